//! Fixed-capacity blocking MPMC queue.
//!
//! This is the hand-off primitive between the dispatcher and the worker
//! pool, and between operation-log producers and the log writer. Producers
//! block while the queue is full, consumers block while it is empty.
//! Termination is cooperative: shutdown is signalled by enqueuing sentinel
//! items understood by the consumers, never by tearing the queue down
//! under a blocked thread.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// A fixed-capacity blocking queue.
///
/// Ordering is strict FIFO; items are moved in and out, never cloned.
pub struct BoundedQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue that holds at most `capacity` items.
    ///
    /// A zero capacity would deadlock the first producer, so it is rejected
    /// up front.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded queue capacity must be positive");
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append an item at the tail, blocking while the queue is full.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        while items.len() == self.capacity {
            self.not_full.wait(&mut items);
        }
        items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Remove and return the head item, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock();
        while items.is_empty() {
            self.not_empty.wait(&mut items);
        }
        let item = items.pop_front().expect("queue is non-empty here");
        self.not_full.notify_one();
        item
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// The fixed capacity this queue was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
