//! Synchronization primitives shared across the server.

pub mod bounded_queue;

pub use bounded_queue::BoundedQueue;
