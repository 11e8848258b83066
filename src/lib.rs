//! # STASHD - In-Memory File Cache Server
//!
//! A bounded, content-addressable file cache served over a UNIX-domain
//! stream socket.
//!
//! ## Architecture
//!
//! - `sync`: bounded blocking queue shared by the dispatcher, the workers,
//!   and the log writer
//! - `cache`: the storage engine — file entries, eviction policies,
//!   content codecs, and the concurrent store
//! - `protocol`: the ASCII length-prefixed wire codec
//! - `server`: dispatcher (readiness loop), worker pool, readback channel,
//!   and signal handling
//! - `logging`: the asynchronous operation-log pipeline
//! - `config`: config-file parsing and typed settings binding

#![warn(clippy::all)]

// Synchronization primitives
pub mod sync;

// Storage engine
pub mod cache;

// Wire protocol
pub mod protocol;

// Server runtime
pub mod server;

// Operation log pipeline
pub mod logging;

// Configuration
pub mod config;

// Re-export commonly used types
pub use cache::{
    codec::CodecKind,
    policy::ReplacementPolicy,
    store::{CacheStore, OpenFlags, StoreConfig, StoreError},
};
pub use config::settings::Settings;
pub use server::Server;

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
