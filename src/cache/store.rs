//! The concurrent cache store.
//!
//! The store owns every [`FileEntry`] through two indices: an
//! insertion-ordered list (the FIFO backbone and eviction-scan spine) and a
//! pathname hash index. Structural changes — insertion, eviction, removal —
//! are serialized behind the store mutex; operations that touch a single
//! file pin the entry's own locks before releasing the store mutex, so
//! readers of distinct files proceed in parallel.
//!
//! Lock order is always store → entry ordering → entry meta → entry
//! content, and entry locks are acquired while the store mutex is still
//! held, so a found entry cannot be destroyed out from under its finder.
//!
//! Every operation takes the caller's identity and reports its outcome to
//! the operation log before returning.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::codec::{Codec, CodecKind};
use super::entry::FileEntry;
use super::policy::ReplacementPolicy;
use super::ClientId;
use crate::logging::event::{LogOutcome, LogRecord, Operation, WAIT_CODE};
use crate::logging::writer::LogSink;

/// Why a store operation was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The pathname is absent.
    #[error("file not found")]
    NotFound,
    /// Lock ownership, the open-descriptor gate, or the first-write rule
    /// forbids the operation.
    #[error("operation forbidden")]
    Forbidden,
    /// The file alone would exceed the cache byte capacity.
    #[error("file exceeds cache capacity")]
    TooBig,
    /// Create was requested for an existing pathname.
    #[error("file already exists")]
    AlreadyExists,
}

impl StoreError {
    /// The protocol response code reported to clients and recorded in the
    /// operation log.
    pub fn response_code(self) -> u8 {
        match self {
            Self::NotFound => 2,
            Self::Forbidden => 3,
            Self::TooBig => 4,
            Self::AlreadyExists => 7,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Flags carried by an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Create the file; it must not already exist.
    pub create: bool,
    /// Acquire the file lock as part of the open.
    pub lock: bool,
}

impl OpenFlags {
    /// Decode the wire representation (bit 0 = create, bit 1 = lock).
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits > 3 {
            return None;
        }
        Some(Self {
            create: bits & 0b01 != 0,
            lock: bits & 0b10 != 0,
        })
    }

    /// The wire representation of these flags.
    pub fn bits(self) -> u8 {
        (self.create as u8) | ((self.lock as u8) << 1)
    }
}

/// A file destroyed by eviction, handed back so the worker can ship it to
/// the client whose write displaced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedFile {
    /// The evicted pathname.
    pub path: Vec<u8>,
    /// Its logical (decoded) content.
    pub content: Vec<u8>,
}

/// Outcome of a successful open.
#[derive(Debug, Default)]
pub struct OpenOutcome {
    /// Clients that were queued on a file evicted to make room; each must
    /// be told the file no longer exists.
    pub vanished: Vec<ClientId>,
}

/// Outcome of a successful write or append.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    /// Files evicted to restore the byte bound, in eviction order.
    pub evicted: Vec<EvictedFile>,
    /// Clients queued on evicted files, to be notified not-found.
    pub vanished: Vec<ClientId>,
}

/// Outcome of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller now owns the lock; respond immediately.
    Acquired,
    /// The caller was queued; no response until the lock is handed over.
    Blocked,
}

/// Outcome of a successful unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockOutcome {
    /// The waiter the lock was handed to, if any; it must be notified that
    /// its earlier lock request succeeded.
    pub handed_to: Option<ClientId>,
}

/// Outcome of a successful remove.
#[derive(Debug, Default)]
pub struct RemoveOutcome {
    /// Clients that were queued for the removed file's lock.
    pub vanished: Vec<ClientId>,
}

/// Outcome of scrubbing an exited client.
#[derive(Debug, Default)]
pub struct ExitOutcome {
    /// Waiters that inherited a lock released by the exit; each must be
    /// notified that its earlier lock request succeeded.
    pub granted: Vec<ClientId>,
}

/// Construction parameters for [`CacheStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Entry-count cap.
    pub max_files: usize,
    /// Aggregate stored-byte cap.
    pub max_bytes: usize,
    /// Victim-selection policy.
    pub policy: ReplacementPolicy,
    /// Content codec applied at the store boundary.
    pub codec: CodecKind,
}

/// High-water marks reported at exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    /// Largest file count ever resident.
    pub max_files_reached: usize,
    /// Largest byte total ever resident.
    pub max_bytes_reached: usize,
    /// Victims evicted over the store's lifetime.
    pub evictions: u64,
    /// Files resident right now.
    pub files_at_exit: usize,
    /// Pathnames resident right now, in insertion order.
    pub remaining_paths: Vec<Vec<u8>>,
}

#[derive(Default)]
struct StoreStats {
    max_files_reached: usize,
    max_bytes_reached: usize,
    evictions: u64,
}

struct StoreInner {
    /// Insertion-ordered entry list.
    entries: Vec<Arc<FileEntry>>,
    /// Pathname index into the same entries.
    index: HashMap<Box<[u8]>, Arc<FileEntry>>,
    /// Sum of stored sizes over all entries.
    current_bytes: usize,
    stats: StoreStats,
}

/// The bounded, concurrent file cache.
pub struct CacheStore {
    max_files: usize,
    max_bytes: usize,
    policy: ReplacementPolicy,
    codec: Box<dyn Codec>,
    tick: AtomicU64,
    log: LogSink,
    inner: Mutex<StoreInner>,
}

impl CacheStore {
    /// Create an empty store with the given bounds, policy, and codec.
    pub fn new(config: StoreConfig, log: LogSink) -> Self {
        Self {
            max_files: config.max_files,
            max_bytes: config.max_bytes,
            policy: config.policy,
            codec: config.codec.build(),
            tick: AtomicU64::new(1),
            log,
            inner: Mutex::new(StoreInner {
                entries: Vec::new(),
                index: HashMap::new(),
                current_bytes: 0,
                stats: StoreStats::default(),
            }),
        }
    }

    /// Open an existing file or create a new one.
    ///
    /// Creating may evict one victim if the store is at its file-count cap;
    /// create+lock additionally grants the caller first-write eligibility.
    pub fn open(
        &self,
        path: &[u8],
        flags: OpenFlags,
        client: ClientId,
    ) -> StoreResult<OpenOutcome> {
        let result = self.open_inner(path, flags, client);
        self.log_result(Operation::Open, path, client, result.as_ref().err(), 0);
        result
    }

    fn open_inner(
        &self,
        path: &[u8],
        flags: OpenFlags,
        client: ClientId,
    ) -> StoreResult<OpenOutcome> {
        let mut inner = self.inner.lock();
        let existing = inner.index.get(path).cloned();

        match (existing, flags.create) {
            (Some(_), true) => Err(StoreError::AlreadyExists),
            (None, false) => Err(StoreError::NotFound),
            (None, true) => {
                let mut vanished = Vec::new();
                if self.max_files > 0 && inner.entries.len() >= self.max_files {
                    if let Some(victim) = self.pick_victim(&inner, None) {
                        let (_, waiters) = Self::unlink(&mut inner, victim);
                        inner.stats.evictions += 1;
                        vanished = waiters;
                    }
                }

                let entry = Arc::new(FileEntry::new(path, self.next_tick()));
                {
                    // Not yet linked into the store, so no contention here.
                    let mut meta = entry.meta.lock();
                    if flags.lock {
                        meta.locked_by = Some(client);
                        meta.first_write = Some(client);
                    }
                    meta.open_by.insert(client);
                }
                inner.index.insert(path.into(), Arc::clone(&entry));
                inner.entries.push(entry);

                let count = inner.entries.len();
                inner.stats.max_files_reached = inner.stats.max_files_reached.max(count);
                Ok(OpenOutcome { vanished })
            }
            (Some(entry), false) => {
                let _ord = entry.ordering.lock();
                let mut meta = entry.meta.lock();
                drop(inner);

                if flags.lock {
                    if meta.locked_by_other(client) {
                        return Err(StoreError::Forbidden);
                    }
                    meta.locked_by = Some(client);
                }
                meta.open_by.insert(client);
                Ok(OpenOutcome::default())
            }
        }
    }

    /// Drop the caller from the file's open-descriptor set.
    pub fn close(&self, path: &[u8], client: ClientId) -> StoreResult<()> {
        let result = self.close_inner(path, client);
        self.log_result(Operation::Close, path, client, result.as_ref().err(), 0);
        result
    }

    fn close_inner(&self, path: &[u8], client: ClientId) -> StoreResult<()> {
        let inner = self.inner.lock();
        let entry = inner.index.get(path).cloned().ok_or(StoreError::NotFound)?;
        let _ord = entry.ordering.lock();
        let mut meta = entry.meta.lock();
        drop(inner);

        if !meta.open_by.remove(&client) {
            return Err(StoreError::Forbidden);
        }
        meta.usage.touch(self.next_tick());
        meta.first_write = None;
        Ok(())
    }

    /// Return a copy of the file's logical content.
    pub fn read(&self, path: &[u8], client: ClientId) -> StoreResult<Vec<u8>> {
        let result = self.read_inner(path, client);
        let bytes = result.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        self.log_result(Operation::Read, path, client, result.as_ref().err(), bytes);
        result
    }

    fn read_inner(&self, path: &[u8], client: ClientId) -> StoreResult<Vec<u8>> {
        let inner = self.inner.lock();
        let entry = inner.index.get(path).cloned().ok_or(StoreError::NotFound)?;
        let ord = entry.ordering.lock();
        let mut meta = entry.meta.lock();
        drop(inner);

        if !meta.may_access(client) {
            return Err(StoreError::Forbidden);
        }
        meta.usage.touch(self.next_tick());
        let logical = meta.logical_size;
        // The read is committed once the gates pass; clearing eligibility
        // here keeps meta strictly outside the content lock.
        meta.first_write = None;

        // Pin the content for reading before leaving the entry's critical
        // section; concurrent readers share this guard, a writer drains it.
        let content = entry.content.read();
        drop(meta);
        drop(ord);

        Ok(self.codec.decode(&content, logical))
    }

    /// Return up to `limit` (≤ 0 meaning all) `(path, content)` pairs in
    /// insertion order.
    pub fn read_n(&self, limit: i64, client: ClientId) -> Vec<(Vec<u8>, Vec<u8>)> {
        let inner = self.inner.lock();
        let take = if limit <= 0 {
            inner.entries.len()
        } else {
            (limit as usize).min(inner.entries.len())
        };

        let mut out = Vec::with_capacity(take);
        let mut total = 0u64;
        for entry in inner.entries.iter().take(take) {
            let logical = entry.meta.lock().logical_size;
            // Writers hold the store mutex for their whole critical
            // section, so the content read lock is uncontended here.
            let content = entry.content.read();
            out.push((entry.path().to_vec(), self.codec.decode(&content, logical)));
            total += logical as u64;
        }
        drop(inner);

        self.log_result(Operation::ReadN, b"", client, None, total);
        out
    }

    /// Overwrite the file's content. Only valid as the first write after a
    /// create+lock open by the same client.
    pub fn write(&self, path: &[u8], data: &[u8], client: ClientId) -> StoreResult<WriteOutcome> {
        let result = self.put(path, data, client, PutKind::Write);
        self.log_result(
            Operation::Write,
            path,
            client,
            result.as_ref().err(),
            data.len() as u64,
        );
        result
    }

    /// Append to the file's content. Not subject to the first-write rule.
    pub fn append(&self, path: &[u8], data: &[u8], client: ClientId) -> StoreResult<WriteOutcome> {
        let result = self.put(path, data, client, PutKind::Append);
        self.log_result(
            Operation::Append,
            path,
            client,
            result.as_ref().err(),
            data.len() as u64,
        );
        result
    }

    fn put(
        &self,
        path: &[u8],
        data: &[u8],
        client: ClientId,
        kind: PutKind,
    ) -> StoreResult<WriteOutcome> {
        // The store mutex is held for the whole write: eviction may
        // restructure the entry list at any point.
        let mut inner = self.inner.lock();
        let entry = inner.index.get(path).cloned().ok_or(StoreError::NotFound)?;
        let _ord = entry.ordering.lock();
        let mut meta = entry.meta.lock();

        if !meta.may_access(client) {
            return Err(StoreError::Forbidden);
        }
        if kind == PutKind::Write && meta.first_write != Some(client) {
            return Err(StoreError::Forbidden);
        }

        // Drains active readers; new ones are held off by the store mutex.
        let mut content = entry.content.write();

        let (new_stored, new_logical) = match kind {
            PutKind::Write => (self.codec.encode(data), data.len()),
            PutKind::Append => {
                let mut logical = self.codec.decode(&content, meta.logical_size);
                logical.extend_from_slice(data);
                let len = logical.len();
                (self.codec.encode(&logical), len)
            }
        };

        if new_stored.len() > self.max_bytes {
            return Err(StoreError::TooBig);
        }

        let mut evicted = Vec::new();
        let mut vanished = Vec::new();
        while inner.current_bytes - meta.stored_size + new_stored.len() > self.max_bytes {
            let Some(victim) = self.pick_victim(&inner, Some(&entry)) else {
                break;
            };
            let (victim, waiters) = Self::unlink(&mut inner, victim);
            inner.stats.evictions += 1;
            vanished.extend(waiters);

            let logical = victim.meta.lock().logical_size;
            let stored = victim.content.read();
            evicted.push(EvictedFile {
                path: victim.path().to_vec(),
                content: self.codec.decode(&stored, logical),
            });
        }

        inner.current_bytes = inner.current_bytes - meta.stored_size + new_stored.len();
        inner.stats.max_bytes_reached = inner.stats.max_bytes_reached.max(inner.current_bytes);

        meta.stored_size = new_stored.len();
        meta.logical_size = new_logical;
        meta.usage.touch(self.next_tick());
        meta.first_write = None;
        *content = new_stored;

        Ok(WriteOutcome { evicted, vanished })
    }

    /// Acquire the file lock, or join the tail of its pending queue.
    pub fn lock(&self, path: &[u8], client: ClientId) -> StoreResult<LockOutcome> {
        let result = self.lock_inner(path, client);
        match &result {
            Ok(LockOutcome::Blocked) => self.log.record(LogRecord::new(
                Operation::Lock,
                path,
                client,
                LogOutcome::Wait { code: WAIT_CODE },
            )),
            other => self.log_result(Operation::Lock, path, client, other.as_ref().err(), 0),
        }
        result
    }

    fn lock_inner(&self, path: &[u8], client: ClientId) -> StoreResult<LockOutcome> {
        let inner = self.inner.lock();
        let entry = inner.index.get(path).cloned().ok_or(StoreError::NotFound)?;
        let _ord = entry.ordering.lock();
        let mut meta = entry.meta.lock();
        drop(inner);

        if meta.locked_by_other(client) {
            meta.enqueue_waiter(client);
            return Ok(LockOutcome::Blocked);
        }

        meta.locked_by = Some(client);
        meta.usage.touch(self.next_tick());
        meta.first_write = None;
        Ok(LockOutcome::Acquired)
    }

    /// Release the file lock, handing it to the head of the pending queue.
    pub fn unlock(&self, path: &[u8], client: ClientId) -> StoreResult<UnlockOutcome> {
        let result = self.unlock_inner(path, client);
        self.log_result(Operation::Unlock, path, client, result.as_ref().err(), 0);
        result
    }

    fn unlock_inner(&self, path: &[u8], client: ClientId) -> StoreResult<UnlockOutcome> {
        let inner = self.inner.lock();
        let entry = inner.index.get(path).cloned().ok_or(StoreError::NotFound)?;
        let _ord = entry.ordering.lock();
        let mut meta = entry.meta.lock();
        drop(inner);

        meta.usage.touch(self.next_tick());
        if meta.locked_by != Some(client) {
            return Err(StoreError::Forbidden);
        }

        let handed_to = meta.hand_off_lock();
        meta.first_write = None;
        Ok(UnlockOutcome { handed_to })
    }

    /// Destroy the file. Only its lock holder may do this.
    pub fn remove(&self, path: &[u8], client: ClientId) -> StoreResult<RemoveOutcome> {
        let result = self.remove_inner(path, client);
        self.log_result(Operation::Remove, path, client, result.as_ref().err(), 0);
        result
    }

    fn remove_inner(&self, path: &[u8], client: ClientId) -> StoreResult<RemoveOutcome> {
        let mut inner = self.inner.lock();
        let entry = inner.index.get(path).cloned().ok_or(StoreError::NotFound)?;

        if entry.meta.lock().locked_by != Some(client) {
            return Err(StoreError::Forbidden);
        }

        let Some(idx) = inner.entries.iter().position(|e| Arc::ptr_eq(e, &entry)) else {
            return Err(StoreError::NotFound);
        };
        let (_, waiters) = Self::unlink(&mut inner, idx);
        Ok(RemoveOutcome { vanished: waiters })
    }

    /// Scrub every trace of an exited client: drop it from open sets and
    /// pending queues, hand over any locks it held, and void any
    /// first-write eligibility it was granted.
    pub fn client_exited(&self, client: ClientId) -> ExitOutcome {
        let inner = self.inner.lock();
        let mut granted = Vec::new();
        for entry in &inner.entries {
            let _ord = entry.ordering.lock();
            let mut meta = entry.meta.lock();

            meta.pending_locks.retain(|&c| c != client);
            meta.open_by.remove(&client);
            if meta.first_write == Some(client) {
                meta.first_write = None;
            }
            if meta.locked_by == Some(client) {
                if let Some(next) = meta.hand_off_lock() {
                    granted.push(next);
                }
            }
        }
        drop(inner);

        self.log_result(Operation::ClientLeft, b"", client, None, 0);
        ExitOutcome { granted }
    }

    /// Files currently resident.
    pub fn file_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Stored bytes currently resident.
    pub fn byte_total(&self) -> usize {
        self.inner.lock().current_bytes
    }

    /// High-water marks and the resident file list, for the exit report.
    pub fn summary(&self) -> StoreSummary {
        let inner = self.inner.lock();
        StoreSummary {
            max_files_reached: inner.stats.max_files_reached,
            max_bytes_reached: inner.stats.max_bytes_reached,
            evictions: inner.stats.evictions,
            files_at_exit: inner.entries.len(),
            remaining_paths: inner.entries.iter().map(|e| e.path().to_vec()).collect(),
        }
    }

    /// The codec this store was built with.
    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Index of the entry the policy would evict, excluding `spare`.
    fn pick_victim(&self, inner: &StoreInner, spare: Option<&Arc<FileEntry>>) -> Option<usize> {
        let mut best: Option<(usize, crate::cache::policy::UsageBits)> = None;
        for (idx, entry) in inner.entries.iter().enumerate() {
            if let Some(spare) = spare {
                if Arc::ptr_eq(spare, entry) {
                    continue;
                }
            }
            let usage = entry.meta.lock().usage;
            match &best {
                Some((_, current)) if !self.policy.prefers(&usage, current) => {}
                _ => best = Some((idx, usage)),
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Unlink the entry at `idx` from both indices, draining any in-flight
    /// readers first, and collect the waiters that must be told the file
    /// is gone. Capacity totals are updated here.
    fn unlink(inner: &mut StoreInner, idx: usize) -> (Arc<FileEntry>, Vec<ClientId>) {
        let entry = inner.entries.remove(idx);
        inner.index.remove(entry.path());

        let waiters;
        {
            let _ord = entry.ordering.lock();
            let mut meta = entry.meta.lock();
            waiters = meta.pending_locks.drain(..).collect();
            meta.open_by.clear();
            meta.locked_by = None;
            meta.first_write = None;
            inner.current_bytes -= meta.stored_size;
            drop(meta);

            // Entry grain drain: no new readers can arrive (the store
            // mutex is held), so this returns once in-flight ones finish.
            let _drained = entry.content.write();
        }
        (entry, waiters)
    }

    fn log_result(
        &self,
        op: Operation,
        path: &[u8],
        client: ClientId,
        err: Option<&StoreError>,
        bytes: u64,
    ) {
        let outcome = match err {
            None => LogOutcome::Success { bytes },
            Some(e) => LogOutcome::Failure {
                code: e.response_code() as i32,
            },
        };
        self.log.record(LogRecord::new(op, path, client, outcome));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PutKind {
    Write,
    Append,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::writer::LogWriter;
    use std::sync::atomic::AtomicUsize;

    static NEXT_LOG: AtomicUsize = AtomicUsize::new(0);

    fn test_store(max_files: usize, max_bytes: usize, policy: ReplacementPolicy) -> CacheStore {
        let path = std::env::temp_dir().join(format!(
            "stashd-store-test-{}-{}.json",
            std::process::id(),
            NEXT_LOG.fetch_add(1, Ordering::Relaxed)
        ));
        let (sink, _writer) = LogWriter::spawn(&path, 4096).unwrap();
        CacheStore::new(
            StoreConfig {
                max_files,
                max_bytes,
                policy,
                codec: CodecKind::Identity,
            },
            sink,
        )
    }

    const CREATE: OpenFlags = OpenFlags {
        create: true,
        lock: false,
    };
    const CREATE_LOCK: OpenFlags = OpenFlags {
        create: true,
        lock: true,
    };

    #[test]
    fn open_flags_round_trip() {
        for bits in 0..=3 {
            assert_eq!(OpenFlags::from_bits(bits).unwrap().bits(), bits);
        }
        assert_eq!(OpenFlags::from_bits(4), None);
    }

    #[test]
    fn create_then_read_round_trip() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE_LOCK, 1).unwrap();
        store.write(b"/f1", b"hello", 1).unwrap();
        assert_eq!(store.read(b"/f1", 1).unwrap(), b"hello");
        assert_eq!(store.byte_total(), 5);
    }

    #[test]
    fn create_on_existing_path_is_rejected() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE, 1).unwrap();
        assert_eq!(
            store.open(b"/f1", CREATE, 2).unwrap_err(),
            StoreError::AlreadyExists
        );
    }

    #[test]
    fn open_without_create_requires_existence() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        assert_eq!(
            store.open(b"/missing", OpenFlags::default(), 1).unwrap_err(),
            StoreError::NotFound
        );
    }

    #[test]
    fn first_write_is_reserved_for_the_creator() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE_LOCK, 1).unwrap();
        store.open(b"/f1", OpenFlags::default(), 2).unwrap();
        // Client 2 opened the file but may not perform the initial write.
        assert_eq!(store.write(b"/f1", b"x", 2).unwrap_err(), StoreError::Forbidden);
        store.write(b"/f1", b"x", 1).unwrap();
        // The eligibility is one-shot.
        assert_eq!(store.write(b"/f1", b"y", 1).unwrap_err(), StoreError::Forbidden);
    }

    #[test]
    fn any_successful_operation_clears_first_write() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE_LOCK, 1).unwrap();
        store.read(b"/f1", 1).unwrap();
        assert_eq!(store.write(b"/f1", b"x", 1).unwrap_err(), StoreError::Forbidden);
    }

    #[test]
    fn append_is_not_subject_to_the_first_write_rule() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE, 1).unwrap();
        store.append(b"/f1", b"abc", 1).unwrap();
        store.append(b"/f1", b"def", 1).unwrap();
        assert_eq!(store.read(b"/f1", 1).unwrap(), b"abcdef");
    }

    #[test]
    fn access_requires_an_open_descriptor() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE, 1).unwrap();
        assert_eq!(store.read(b"/f1", 2).unwrap_err(), StoreError::Forbidden);
        assert_eq!(store.append(b"/f1", b"x", 2).unwrap_err(), StoreError::Forbidden);
        assert_eq!(store.close(b"/f1", 2).unwrap_err(), StoreError::Forbidden);
    }

    #[test]
    fn oversized_write_fails_before_evicting_anything() {
        let store = test_store(10, 10, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE, 1).unwrap();
        store.append(b"/f1", b"abc", 1).unwrap();
        store.open(b"/f2", CREATE_LOCK, 1).unwrap();
        assert_eq!(
            store.write(b"/f2", b"0123456789ab", 1).unwrap_err(),
            StoreError::TooBig
        );
        // The failed write must not have cannibalized the neighbour.
        assert_eq!(store.file_count(), 2);
        assert_eq!(store.byte_total(), 3);
    }

    #[test]
    fn eviction_prefers_the_lru_victim() {
        let store = test_store(2, 100, ReplacementPolicy::Lru);
        store.open(b"/f1", CREATE, 1).unwrap();
        store.open(b"/f2", CREATE, 1).unwrap();
        // Touch f1 so f2 becomes the coldest.
        store.read(b"/f1", 1).unwrap();
        store.open(b"/f3", CREATE, 1).unwrap();

        let resident: Vec<Vec<u8>> = store.summary().remaining_paths;
        assert!(resident.contains(&b"/f1".to_vec()));
        assert!(resident.contains(&b"/f3".to_vec()));
        assert!(!resident.contains(&b"/f2".to_vec()));
    }

    #[test]
    fn eviction_ties_break_toward_earliest_insertion() {
        let store = test_store(2, 100, ReplacementPolicy::Lfu);
        store.open(b"/f1", CREATE, 1).unwrap();
        store.open(b"/f2", CREATE, 1).unwrap();
        // Equal reference counts: the older insertion goes first.
        store.open(b"/f3", CREATE, 1).unwrap();

        let resident = store.summary().remaining_paths;
        assert!(!resident.contains(&b"/f1".to_vec()));
    }

    #[test]
    fn remove_requires_the_lock_holder() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE_LOCK, 1).unwrap();
        assert_eq!(store.remove(b"/f1", 2).unwrap_err(), StoreError::Forbidden);
        store.remove(b"/f1", 1).unwrap();
        assert_eq!(store.file_count(), 0);
    }

    #[test]
    fn remove_on_an_unlocked_file_is_forbidden() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE, 1).unwrap();
        assert_eq!(store.remove(b"/f1", 1).unwrap_err(), StoreError::Forbidden);
    }

    #[test]
    fn lock_handoff_is_fifo() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE_LOCK, 1).unwrap();
        assert_eq!(store.lock(b"/f1", 2).unwrap(), LockOutcome::Blocked);
        assert_eq!(store.lock(b"/f1", 3).unwrap(), LockOutcome::Blocked);

        let unlocked = store.unlock(b"/f1", 1).unwrap();
        assert_eq!(unlocked.handed_to, Some(2));
        let unlocked = store.unlock(b"/f1", 2).unwrap();
        assert_eq!(unlocked.handed_to, Some(3));
        let unlocked = store.unlock(b"/f1", 3).unwrap();
        assert_eq!(unlocked.handed_to, None);
    }

    #[test]
    fn relocking_your_own_file_is_idempotent() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE_LOCK, 1).unwrap();
        assert_eq!(store.lock(b"/f1", 1).unwrap(), LockOutcome::Acquired);
    }

    #[test]
    fn unlock_by_a_non_holder_is_forbidden() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE_LOCK, 1).unwrap();
        assert_eq!(store.unlock(b"/f1", 2).unwrap_err(), StoreError::Forbidden);
    }

    #[test]
    fn read_n_returns_insertion_order_and_honors_the_limit() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/a", CREATE, 1).unwrap();
        store.append(b"/a", b"1", 1).unwrap();
        store.open(b"/b", CREATE, 1).unwrap();
        store.append(b"/b", b"22", 1).unwrap();
        store.open(b"/c", CREATE, 1).unwrap();

        let all = store.read_n(0, 1);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], (b"/a".to_vec(), b"1".to_vec()));
        assert_eq!(all[1], (b"/b".to_vec(), b"22".to_vec()));
        assert_eq!(all[2], (b"/c".to_vec(), Vec::new()));

        assert_eq!(store.read_n(2, 1).len(), 2);
        assert_eq!(store.read_n(-1, 1).len(), 3);
    }

    #[test]
    fn client_exit_scrubs_every_trace() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE_LOCK, 10).unwrap();
        store.open(b"/f2", CREATE, 10).unwrap();
        store.open(b"/f1", OpenFlags::default(), 11).unwrap();
        assert_eq!(store.lock(b"/f1", 11).unwrap(), LockOutcome::Blocked);

        let exit = store.client_exited(10);
        assert_eq!(exit.granted, vec![11]);

        // The lock went to 11; 10 is gone from every structure, so a
        // fresh unlock by 11 leaves the file unlocked.
        assert_eq!(store.unlock(b"/f1", 11).unwrap().handed_to, None);
        assert_eq!(store.read(b"/f2", 10).unwrap_err(), StoreError::Forbidden);
    }

    #[test]
    fn exit_of_a_waiter_leaves_the_queue_without_it() {
        let store = test_store(10, 100, ReplacementPolicy::Fifo);
        store.open(b"/f1", CREATE_LOCK, 1).unwrap();
        assert_eq!(store.lock(b"/f1", 2).unwrap(), LockOutcome::Blocked);
        assert_eq!(store.lock(b"/f1", 3).unwrap(), LockOutcome::Blocked);

        let exit = store.client_exited(2);
        assert!(exit.granted.is_empty());
        assert_eq!(store.unlock(b"/f1", 1).unwrap().handed_to, Some(3));
    }

    #[test]
    fn rle_store_accounts_capacity_in_stored_bytes() {
        let path = std::env::temp_dir().join(format!(
            "stashd-store-test-rle-{}.json",
            std::process::id()
        ));
        let (sink, _writer) = LogWriter::spawn(&path, 4096).unwrap();
        let store = CacheStore::new(
            StoreConfig {
                max_files: 10,
                max_bytes: 10,
                policy: ReplacementPolicy::Fifo,
                codec: CodecKind::Rle,
            },
            sink,
        );

        store.open(b"/runs", CREATE_LOCK, 1).unwrap();
        // 16 logical bytes, but "xx9xx7" stored: fits the 10-byte cap.
        store.write(b"/runs", &vec![b'x'; 16], 1).unwrap();
        assert_eq!(store.byte_total(), 6);
        assert_eq!(store.read(b"/runs", 1).unwrap(), vec![b'x'; 16]);
    }
}
