//! Shutdown signal handling.
//!
//! SIGHUP requests a soft shutdown (stop accepting, finish live clients),
//! SIGINT and SIGQUIT request a hard shutdown (drop everything). SIGPIPE
//! is ignored so a vanished client surfaces as a write error on its
//! socket instead of killing the process.

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide shutdown state, written by signal handlers and polled by
/// the dispatcher.
#[derive(Clone)]
pub struct ShutdownFlags {
    soft: Arc<AtomicBool>,
    hard: Arc<AtomicBool>,
}

impl ShutdownFlags {
    /// Register the signal handlers and ignore SIGPIPE.
    pub fn install() -> io::Result<Self> {
        let soft = Arc::new(AtomicBool::new(false));
        let hard = Arc::new(AtomicBool::new(false));

        signal_hook::flag::register(SIGHUP, Arc::clone(&soft))?;
        signal_hook::flag::register(SIGINT, Arc::clone(&hard))?;
        signal_hook::flag::register(SIGQUIT, Arc::clone(&hard))?;

        if unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { soft, hard })
    }

    /// Whether a soft shutdown has been requested.
    pub fn soft_requested(&self) -> bool {
        self.soft.load(Ordering::Relaxed)
    }

    /// Whether a hard shutdown has been requested.
    pub fn hard_requested(&self) -> bool {
        self.hard.load(Ordering::Relaxed)
    }
}
