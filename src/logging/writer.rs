//! The log-writer thread and its producer handle.
//!
//! Records travel through a bounded blocking queue to a single writer,
//! which appends them to the log file as members of one JSON array: `[` on
//! start, comma-separated objects, `]` when the flush-and-stop sentinel
//! arrives. A full queue blocks producers rather than dropping records.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::event::LogRecord;
use crate::sync::BoundedQueue;

enum LogMessage {
    Record(Box<LogRecord>),
    FlushAndStop,
}

/// Cloneable producer handle onto the log queue.
#[derive(Clone)]
pub struct LogSink {
    queue: Arc<BoundedQueue<LogMessage>>,
}

impl LogSink {
    /// Enqueue one record, blocking while the queue is full.
    pub fn record(&self, record: LogRecord) {
        self.queue.push(LogMessage::Record(Box::new(record)));
    }

    /// Ask the writer to close the array and exit. Call once, after every
    /// producer is done.
    pub fn flush_and_stop(&self) {
        self.queue.push(LogMessage::FlushAndStop);
    }
}

/// The single consumer of the log queue.
pub struct LogWriter;

impl LogWriter {
    /// Open `path` for writing and start the writer thread.
    ///
    /// Returns the producer handle and the thread's join handle; joining
    /// yields the writer's I/O result after a `flush_and_stop`.
    pub fn spawn(
        path: &Path,
        queue_capacity: usize,
    ) -> io::Result<(LogSink, JoinHandle<io::Result<()>>)> {
        let file = File::create(path)?;
        let queue = Arc::new(BoundedQueue::new(queue_capacity));
        let sink = LogSink {
            queue: Arc::clone(&queue),
        };

        let handle = thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || Self::run(queue, file))?;

        Ok((sink, handle))
    }

    fn run(queue: Arc<BoundedQueue<LogMessage>>, file: File) -> io::Result<()> {
        let mut out = BufWriter::new(file);
        out.write_all(b"[\n")?;

        let mut first = true;
        loop {
            match queue.pop() {
                LogMessage::Record(record) => {
                    if !first {
                        out.write_all(b",\n")?;
                    }
                    first = false;
                    let json = serde_json::to_string_pretty(&*record)?;
                    out.write_all(json.as_bytes())?;
                }
                LogMessage::FlushAndStop => break,
            }
        }

        out.write_all(b"\n]\n")?;
        out.flush()
    }
}
