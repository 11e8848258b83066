//! The worker loop.
//!
//! A worker dequeues one ready descriptor, reads exactly one request,
//! dispatches it to the store, writes the response (plus any payload),
//! and hands the descriptor back through the readback channel. Clients
//! parked on a lock are not re-armed; the hand-off that eventually grants
//! (or voids) the lock responds to them and re-arms them.
//!
//! A write failure toward a client tears down that client only.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use super::dispatcher::Task;
use super::readback::Courier;
use crate::cache::store::{CacheStore, EvictedFile, LockOutcome};
use crate::cache::ClientId;
use crate::logging;
use crate::protocol::response::{self, ResponseCode};
use crate::protocol::wire::{self, ProtocolError};
use crate::protocol::Request;
use crate::sync::BoundedQueue;

/// One thread of the pool.
pub struct Worker {
    /// Worker identity used for log attribution (1-based).
    pub id: u64,
    /// The dispatcher→worker task queue.
    pub tasks: Arc<BoundedQueue<Task>>,
    /// The shared store.
    pub store: Arc<CacheStore>,
    /// Worker side of the readback channel.
    pub courier: Courier,
}

impl Worker {
    /// Serve tasks until the shutdown sentinel arrives.
    pub fn run(self) {
        logging::set_worker_id(self.id);
        loop {
            match self.tasks.pop() {
                Task::Shutdown => break,
                Task::Client(stream) => self.serve(stream),
            }
        }
    }

    fn serve(&self, mut stream: UnixStream) {
        let client = stream.as_raw_fd();

        let request = match Request::read_from(&mut stream) {
            Ok(request) => request,
            Err(ProtocolError::Eof) => {
                drop(stream);
                self.disconnect(client);
                return;
            }
            Err(ProtocolError::Malformed(reason)) => {
                // The client stays connected; it just gets told off.
                log::debug!("client {client}: bad request: {reason}");
                match response::write_code(&mut stream, ResponseCode::BadRequest) {
                    Ok(()) => self.hand_back(stream),
                    Err(_) => {
                        drop(stream);
                        self.disconnect(client);
                    }
                }
                return;
            }
            Err(ProtocolError::Io(e)) => {
                log::warn!("client {client}: transport error: {e}");
                drop(stream);
                self.disconnect(client);
                return;
            }
        };

        if let Some(path) = request.path() {
            if path.is_empty() {
                match response::write_code(&mut stream, ResponseCode::BadRequest) {
                    Ok(()) => self.hand_back(stream),
                    Err(_) => {
                        drop(stream);
                        self.disconnect(client);
                    }
                }
                return;
            }
        }

        match request {
            Request::Lock { path } => self.handle_lock(stream, client, &path),
            request => match self.handle(&mut stream, client, request) {
                Ok(()) => self.hand_back(stream),
                Err(e) => {
                    log::warn!("client {client}: dropped while responding: {e}");
                    drop(stream);
                    self.disconnect(client);
                }
            },
        }
    }

    /// Dispatch one request and write the full response. An `Err` means
    /// this client's socket failed and the caller must tear it down.
    fn handle(
        &self,
        stream: &mut UnixStream,
        client: ClientId,
        request: Request,
    ) -> io::Result<()> {
        match request {
            Request::Open { path, flags } => match self.store.open(&path, flags, client) {
                Ok(outcome) => {
                    response::write_code(stream, ResponseCode::Ok)?;
                    self.notify(outcome.vanished, ResponseCode::FileNotFound);
                    Ok(())
                }
                Err(e) => response::write_code(stream, e.into()),
            },
            Request::Read { path } => match self.store.read(&path, client) {
                Ok(bytes) => {
                    response::write_code(stream, ResponseCode::Ok)?;
                    wire::write_segment(stream, &bytes)
                }
                Err(e) => response::write_code(stream, e.into()),
            },
            Request::ReadN { limit } => {
                let files = self.store.read_n(limit, client);
                response::write_code(stream, ResponseCode::Ok)?;
                response::write_file_list(stream, &files)
            }
            Request::Write { path, content } => match self.store.write(&path, &content, client) {
                Ok(outcome) => {
                    response::write_code(stream, ResponseCode::Ok)?;
                    write_evicted(stream, &outcome.evicted)?;
                    self.notify(outcome.vanished, ResponseCode::FileNotFound);
                    Ok(())
                }
                Err(e) => response::write_code(stream, e.into()),
            },
            Request::Append { path, content } => match self.store.append(&path, &content, client) {
                Ok(outcome) => {
                    response::write_code(stream, ResponseCode::Ok)?;
                    write_evicted(stream, &outcome.evicted)?;
                    self.notify(outcome.vanished, ResponseCode::FileNotFound);
                    Ok(())
                }
                Err(e) => response::write_code(stream, e.into()),
            },
            Request::Unlock { path } => match self.store.unlock(&path, client) {
                Ok(outcome) => {
                    response::write_code(stream, ResponseCode::Ok)?;
                    if let Some(waiter) = outcome.handed_to {
                        self.notify(vec![waiter], ResponseCode::Ok);
                    }
                    Ok(())
                }
                Err(e) => response::write_code(stream, e.into()),
            },
            Request::Close { path } => match self.store.close(&path, client) {
                Ok(()) => response::write_code(stream, ResponseCode::Ok),
                Err(e) => response::write_code(stream, e.into()),
            },
            Request::Remove { path } => match self.store.remove(&path, client) {
                Ok(outcome) => {
                    response::write_code(stream, ResponseCode::Ok)?;
                    self.notify(outcome.vanished, ResponseCode::FileNotFound);
                    Ok(())
                }
                Err(e) => response::write_code(stream, e.into()),
            },
            Request::Lock { .. } => unreachable!("lock requests take the parked path"),
        }
    }

    /// Lock requests park the socket *before* asking the store, so a
    /// concurrent unlock can never grant the lock to a waiter whose
    /// socket is not in the wait table yet.
    fn handle_lock(&self, stream: UnixStream, client: ClientId, path: &[u8]) {
        self.courier.park(stream);

        let result = self.store.lock(path, client);
        if matches!(result, Ok(LockOutcome::Blocked)) {
            // Parked for real: the response comes with the hand-off.
            return;
        }

        // Immediate outcome: reclaim our own socket and respond. If it is
        // already gone, a racing hand-off responded for us.
        let Some(mut stream) = self.courier.unpark(client) else {
            return;
        };
        let code = match result {
            Ok(_) => ResponseCode::Ok,
            Err(e) => e.into(),
        };
        match response::write_code(&mut stream, code) {
            Ok(()) => self.hand_back(stream),
            Err(_) => {
                drop(stream);
                self.disconnect(client);
            }
        }
    }

    /// Deliver a response code to parked waiters and re-arm them. A
    /// waiter whose socket fails is torn down in place, which may grant
    /// locks onward; those cascade through the same queue.
    fn notify(&self, initial: Vec<ClientId>, code: ResponseCode) {
        let mut pending: VecDeque<(ClientId, ResponseCode)> =
            initial.into_iter().map(|fd| (fd, code)).collect();

        while let Some((fd, code)) = pending.pop_front() {
            let Some(mut stream) = self.courier.unpark(fd) else {
                log::warn!("no parked socket for waiter {fd}");
                continue;
            };
            match response::write_code(&mut stream, code) {
                Ok(()) => self.hand_back(stream),
                Err(_) => {
                    drop(stream);
                    let exit = self.store.client_exited(fd);
                    self.report_client_gone();
                    for granted in exit.granted {
                        pending.push_back((granted, ResponseCode::Ok));
                    }
                }
            }
        }
    }

    fn disconnect(&self, client: ClientId) {
        let exit = self.store.client_exited(client);
        self.report_client_gone();
        self.notify(exit.granted, ResponseCode::Ok);
    }

    fn hand_back(&self, stream: UnixStream) {
        if let Err(e) = self.courier.rearm(stream) {
            // Only possible when the dispatcher is already gone.
            log::error!("readback channel failed: {e}");
        }
    }

    fn report_client_gone(&self) {
        if let Err(e) = self.courier.client_gone() {
            log::error!("readback channel failed: {e}");
        }
    }
}

fn write_evicted(stream: &mut UnixStream, evicted: &[EvictedFile]) -> io::Result<()> {
    for file in evicted {
        wire::write_segment(stream, &file.path)?;
        wire::write_segment(stream, &file.content)?;
    }
    wire::write_sentinel(stream)?;
    stream.flush()
}
