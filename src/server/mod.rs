//! # The Server Runtime
//!
//! Wires the pieces together: one dispatcher thread multiplexing the
//! socket, a pool of workers draining the task queue, one log-writer
//! thread, and the readback channel closing the loop.
//!
//! - `dispatcher`: the accept/readiness reactor
//! - `worker`: request execution against the store
//! - `readback`: the worker→dispatcher pipe and socket tables
//! - `signals`: soft/hard shutdown flags

pub mod dispatcher;
pub mod readback;
pub mod signals;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherReport, Task};
pub use worker::Worker;

use anyhow::Context;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crate::cache::store::{CacheStore, StoreConfig, StoreSummary};
use crate::config::Settings;
use crate::logging::writer::LogWriter;
use crate::sync::BoundedQueue;
use signals::ShutdownFlags;

/// Final counters printed on clean exit.
#[derive(Debug, Clone)]
pub struct ServerReport {
    /// Store high-water marks and the resident file list.
    pub summary: StoreSummary,
    /// Largest number of simultaneously connected clients.
    pub max_clients: usize,
}

/// The assembled cache server.
pub struct Server {
    settings: Settings,
}

impl Server {
    /// Build a server from validated settings.
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run until a shutdown signal completes, then return the exit report.
    pub fn run(&self) -> anyhow::Result<ServerReport> {
        let settings = &self.settings;

        let flags = ShutdownFlags::install().context("installing signal handlers")?;

        if settings.socket_path.exists() {
            log::warn!(
                "removing stale socket {}",
                settings.socket_path.display()
            );
            std::fs::remove_file(&settings.socket_path).context("removing stale socket")?;
        }

        let (sink, log_handle) = LogWriter::spawn(&settings.log_path, settings.log_queue_capacity)
            .with_context(|| format!("opening log file {}", settings.log_path.display()))?;

        let store = Arc::new(CacheStore::new(
            StoreConfig {
                max_files: settings.max_file_count,
                max_bytes: settings.max_bytes,
                policy: settings.replacement_policy,
                codec: settings.compression,
            },
            sink.clone(),
        ));

        let tasks = Arc::new(BoundedQueue::new(settings.task_queue_capacity));
        let (readback_rx, courier) = readback::channel().context("creating readback pipe")?;

        let listener = bind_with_backlog(&settings.socket_path, settings.backlog)
            .with_context(|| format!("binding {}", settings.socket_path.display()))?;

        log::info!(
            "listening on {} ({} workers, {:?} policy, {} codec)",
            settings.socket_path.display(),
            settings.pool_size,
            settings.replacement_policy,
            store.codec_name()
        );

        let workers: Vec<_> = (0..settings.pool_size)
            .map(|i| {
                let worker = Worker {
                    id: (i + 1) as u64,
                    tasks: Arc::clone(&tasks),
                    store: Arc::clone(&store),
                    courier: courier.clone(),
                };
                thread::Builder::new()
                    .name(format!("worker-{}", i + 1))
                    .spawn(move || worker.run())
            })
            .collect::<io::Result<_>>()
            .context("spawning worker pool")?;

        let dispatcher = Dispatcher::new(
            listener,
            readback_rx,
            Arc::clone(&tasks),
            flags,
            sink.clone(),
        );
        let report = dispatcher.run().context("dispatcher failed")?;

        // Cooperative teardown: one sentinel per worker, then the log.
        for _ in 0..workers.len() {
            tasks.push(Task::Shutdown);
        }
        for handle in workers {
            if handle.join().is_err() {
                log::error!("a worker thread panicked");
            }
        }

        sink.flush_and_stop();
        match log_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("log writer failed: {e}"),
            Err(_) => log::error!("log writer panicked"),
        }

        let _ = std::fs::remove_file(&settings.socket_path);

        Ok(ServerReport {
            summary: store.summary(),
            max_clients: report.max_clients,
        })
    }
}

/// Bind a UNIX-domain stream listener with an explicit backlog.
///
/// `std`'s `UnixListener::bind` hard-codes its backlog, so the socket is
/// set up through libc and only then wrapped.
fn bind_with_backlog(path: &Path, backlog: i32) -> io::Result<UnixListener> {
    let bytes = path.as_os_str().as_bytes();
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path too long for sockaddr_un",
        ));
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = *src as libc::c_char;
    }

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    let len = (std::mem::size_of::<libc::sa_family_t>() + bytes.len() + 1) as libc::socklen_t;
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            (&addr as *const libc::sockaddr_un).cast(),
            len,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::listen(socket.as_raw_fd(), backlog) } == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(UnixListener::from(socket))
}
