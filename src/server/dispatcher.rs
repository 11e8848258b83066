//! The single-threaded reactor.
//!
//! One thread owns the listening socket, the readiness set, and the read
//! end of the readback pipe. Ready client descriptors are pushed onto the
//! task queue — ownership of the socket transfers to the worker that will
//! serve it and comes back through the readback channel. The dispatcher
//! itself never reads a request.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;

use super::readback::{ReadbackMessage, ReadbackReceiver};
use super::signals::ShutdownFlags;
use crate::logging::event::{LogOutcome, LogRecord, Operation};
use crate::logging::writer::LogSink;
use crate::sync::BoundedQueue;

/// Items travelling from the dispatcher to the worker pool.
pub enum Task {
    /// A client descriptor with a request ready to read.
    Client(UnixStream),
    /// Cooperative termination sentinel; each worker consumes one.
    Shutdown,
}

/// What the dispatcher observed over its lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherReport {
    /// Largest number of simultaneously connected clients.
    pub max_clients: usize,
}

/// Poll timeout; bounds the latency of noticing a shutdown signal.
const POLL_INTERVAL_MS: i32 = 250;

/// The accept/readiness loop.
pub struct Dispatcher {
    listener: UnixListener,
    readback: ReadbackReceiver,
    tasks: Arc<BoundedQueue<Task>>,
    flags: ShutdownFlags,
    log: LogSink,
    clients: HashMap<RawFd, UnixStream>,
    live_clients: usize,
    max_clients: usize,
}

impl Dispatcher {
    /// Wire up a dispatcher over an already-bound listener.
    pub fn new(
        listener: UnixListener,
        readback: ReadbackReceiver,
        tasks: Arc<BoundedQueue<Task>>,
        flags: ShutdownFlags,
        log: LogSink,
    ) -> Self {
        Self {
            listener,
            readback,
            tasks,
            flags,
            log,
            clients: HashMap::new(),
            live_clients: 0,
            max_clients: 0,
        }
    }

    /// Run until shutdown. Hard shutdown drops everything immediately;
    /// soft shutdown stops accepting and exits once the live-client count
    /// reaches zero.
    pub fn run(mut self) -> io::Result<DispatcherReport> {
        loop {
            if self.flags.hard_requested() {
                log::info!("hard shutdown: dropping {} client(s)", self.live_clients);
                break;
            }
            if self.flags.soft_requested() && self.live_clients == 0 {
                log::info!("soft shutdown complete");
                break;
            }

            let armed: Vec<RawFd> = self.clients.keys().copied().collect();
            let mut fds = Vec::with_capacity(2 + armed.len());
            fds.push(pollfd_for(self.listener.as_raw_fd()));
            fds.push(pollfd_for(self.readback.raw_fd()));
            fds.extend(armed.iter().map(|&fd| pollfd_for(fd)));

            if poll(&mut fds, POLL_INTERVAL_MS)? == 0 {
                continue;
            }

            if is_ready(fds[0].revents) {
                self.accept_one();
            }
            if is_ready(fds[1].revents) {
                self.handle_readback()?;
            }
            for (slot, fd) in armed.iter().enumerate() {
                if is_ready(fds[2 + slot].revents) {
                    if let Some(stream) = self.clients.remove(fd) {
                        self.tasks.push(Task::Client(stream));
                    }
                }
            }
        }

        Ok(DispatcherReport {
            max_clients: self.max_clients,
        })
    }

    fn accept_one(&mut self) {
        match self.listener.accept() {
            Ok((stream, _)) => {
                if self.flags.soft_requested() {
                    // Accept and immediately close: the client sees EOF
                    // instead of a connection hanging in the backlog.
                    log::debug!("soft shutdown: rejecting new connection");
                    return;
                }
                let fd = stream.as_raw_fd();
                self.live_clients += 1;
                self.max_clients = self.max_clients.max(self.live_clients);
                log::debug!("client {fd} connected ({} live)", self.live_clients);
                self.log.record(LogRecord::new(
                    Operation::NewClient,
                    b"",
                    fd,
                    LogOutcome::Success { bytes: 0 },
                ));
                self.clients.insert(fd, stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::error!("accept failed: {e}"),
        }
    }

    fn handle_readback(&mut self) -> io::Result<()> {
        match self.readback.read_frame()? {
            ReadbackMessage::ClientGone => {
                self.live_clients = self.live_clients.saturating_sub(1);
                log::debug!("client left ({} live)", self.live_clients);
            }
            ReadbackMessage::Rearm(fd) => match self.readback.take(fd) {
                Some(stream) => {
                    self.clients.insert(fd, stream);
                }
                None => log::warn!("readback frame for unknown descriptor {fd}"),
            },
        }
        Ok(())
    }
}

fn pollfd_for(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

fn is_ready(revents: libc::c_short) -> bool {
    revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0
}

fn poll(fds: &mut [libc::pollfd], timeout_ms: i32) -> io::Result<i32> {
    loop {
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc >= 0 {
            return Ok(rc);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
