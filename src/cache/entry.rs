//! Per-file cache entries.
//!
//! Every entry carries three coordination layers, always acquired in this
//! order (after the store mutex, which is always first):
//!
//! 1. `ordering` — serializes arrivals at the entry so readers, writers,
//!    and structural changes queue in arrival order;
//! 2. `meta` — short critical sections over lock ownership, the pending
//!    FIFO, the open-descriptor set, first-write eligibility, and the
//!    usage bits;
//! 3. `content` — the single-writer/multi-reader machine over the stored
//!    bytes. The `RwLock` states map onto the entry lifecycle: unheld is
//!    Idle, read-held is Reading, write-held is Writing. Destruction takes
//!    the write half, so it drains active readers and the writer first.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};

use super::policy::UsageBits;
use super::ClientId;

/// A cached file.
pub struct FileEntry {
    path: Box<[u8]>,
    pub(crate) ordering: Mutex<()>,
    pub(crate) meta: Mutex<EntryMeta>,
    pub(crate) content: RwLock<Vec<u8>>,
}

/// Mutable entry state other than the content bytes.
pub struct EntryMeta {
    /// Bytes actually held (encoded form).
    pub stored_size: usize,
    /// Bytes as seen by clients.
    pub logical_size: usize,
    /// Lock owner, if any.
    pub locked_by: Option<ClientId>,
    /// Clients waiting to acquire the lock, strict FIFO, no duplicates.
    pub pending_locks: VecDeque<ClientId>,
    /// Clients that currently have the file open.
    pub open_by: HashSet<ClientId>,
    /// Client licensed to perform the initial write after create+lock.
    pub first_write: Option<ClientId>,
    /// Eviction-policy bookkeeping.
    pub usage: UsageBits,
}

impl FileEntry {
    /// A fresh, empty entry inserted at `tick`.
    pub fn new(path: &[u8], tick: u64) -> Self {
        Self {
            path: path.into(),
            ordering: Mutex::new(()),
            meta: Mutex::new(EntryMeta {
                stored_size: 0,
                logical_size: 0,
                locked_by: None,
                pending_locks: VecDeque::new(),
                open_by: HashSet::new(),
                first_write: None,
                usage: UsageBits::new(tick),
            }),
            content: RwLock::new(Vec::new()),
        }
    }

    /// The pathname identifying this entry (opaque bytes).
    pub fn path(&self) -> &[u8] {
        &self.path
    }
}

impl EntryMeta {
    /// Whether `client` may access the file: it must hold the file open
    /// and the file must not be locked by somebody else.
    pub fn may_access(&self, client: ClientId) -> bool {
        self.open_by.contains(&client) && !self.locked_by_other(client)
    }

    /// Whether the file is locked by a client other than `client`.
    pub fn locked_by_other(&self, client: ClientId) -> bool {
        matches!(self.locked_by, Some(owner) if owner != client)
    }

    /// Append `client` to the pending-lock queue unless already queued.
    pub fn enqueue_waiter(&mut self, client: ClientId) {
        if !self.pending_locks.contains(&client) {
            self.pending_locks.push_back(client);
        }
    }

    /// Hand the lock to the head of the pending queue, or leave the file
    /// unlocked if nobody is waiting. Returns the new owner.
    pub fn hand_off_lock(&mut self) -> Option<ClientId> {
        let next = self.pending_locks.pop_front();
        self.locked_by = next;
        next
    }
}
