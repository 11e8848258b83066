//! # The Operation Log Pipeline
//!
//! Every operation attempted at the store, plus connection arrivals and
//! departures, becomes a structured record. Producers enqueue records onto
//! a bounded queue; a single writer thread appends them to a file as a
//! JSON array. Back-pressure is blocking: the log never drops records.

pub mod event;
pub mod writer;

pub use event::{LogOutcome, LogRecord, Operation};
pub use writer::{LogSink, LogWriter};

use std::cell::Cell;

thread_local! {
    static WORKER_ID: Cell<u64> = const { Cell::new(0) };
}

/// Tag the calling thread with a worker identity for log attribution.
///
/// The dispatcher and the main thread keep the default identity 0.
pub fn set_worker_id(id: u64) {
    WORKER_ID.with(|w| w.set(id));
}

/// The worker identity of the calling thread.
pub fn worker_id() -> u64 {
    WORKER_ID.with(|w| w.get())
}
