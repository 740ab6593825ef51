//! MemoryStore: in-process transactional store
//!
//! This module implements the `Store` trait using:
//! - `BTreeMap<RecordKey, VersionChain>` for ordered, multi-version rows
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` for monotonically increasing commit versions
//! - A shared table of uncommitted writes, visible at READ UNCOMMITTED
//! - `LockManager` row locks, held from write until commit or rollback
//!
//! # Isolation
//!
//! | Level | Read source | Write conflict | Commit check |
//! |-------|-------------|----------------|--------------|
//! | READ UNCOMMITTED | own, then uncommitted, then latest committed | row lock | none |
//! | READ COMMITTED | own, then latest committed | row lock | none |
//! | REPEATABLE READ | own, then begin snapshot | row lock + first-updater-wins | none |
//! | SERIALIZABLE | own, then begin snapshot | row lock + first-updater-wins | read-set and range validation |

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use txnlab_concurrency::{LockManager, OwnerId};
use txnlab_core::{RecordKey, Store, StoreError, StoreResult};

use crate::session::MemorySession;
use crate::version::{StoredVersion, VersionChain};

/// Default lock-wait timeout
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// An uncommitted write, `None` for a pending delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingWrite {
    pub(crate) owner: OwnerId,
    pub(crate) value: Option<i64>,
}

/// State shared by the store handle and all of its sessions
#[derive(Debug)]
pub(crate) struct StoreInner {
    pub(crate) data: RwLock<BTreeMap<RecordKey, VersionChain>>,
    pub(crate) pending: Mutex<FxHashMap<RecordKey, PendingWrite>>,
    pub(crate) version: AtomicU64,
    pub(crate) locks: LockManager,
    /// Serializes validation and apply of commits
    pub(crate) commit_lock: Mutex<()>,
    pub(crate) available: AtomicBool,
    pub(crate) next_owner: AtomicU64,
    pub(crate) active: AtomicUsize,
}

impl StoreInner {
    pub(crate) fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub(crate) fn allocate_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Latest committed value and its version
    pub(crate) fn latest_committed(&self, key: &RecordKey) -> (Option<i64>, u64) {
        let data = self.data.read();
        data.get(key)
            .and_then(|chain| chain.latest())
            .map_or((None, 0), |v| (v.value, v.version))
    }

    /// Committed value visible to a snapshot and its version
    pub(crate) fn committed_at(&self, key: &RecordKey, snapshot: u64) -> (Option<i64>, u64) {
        let data = self.data.read();
        data.get(key)
            .and_then(|chain| chain.get_at_version(snapshot))
            .map_or((None, 0), |v| (v.value, v.version))
    }

    /// Whether a commit newer than `snapshot` touched the key
    pub(crate) fn changed_since(&self, key: &RecordKey, snapshot: u64) -> bool {
        self.data
            .read()
            .get(key)
            .map_or(false, |chain| chain.changed_since(snapshot))
    }

    /// Uncommitted write of another owner
    pub(crate) fn foreign_pending(&self, key: &RecordKey, owner: OwnerId) -> Option<PendingWrite> {
        self.pending
            .lock()
            .get(key)
            .copied()
            .filter(|p| p.owner != owner)
    }

    /// Keys of one table that have committed history
    pub(crate) fn table_keys(&self, table: &str) -> Vec<RecordKey> {
        let data = self.data.read();
        let start = RecordKey::new(table, "");
        data.range((Bound::Included(start), Bound::Unbounded))
            .take_while(|(key, _)| key.table() == table)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys of one table with an uncommitted write by another owner
    pub(crate) fn foreign_pending_keys(&self, table: &str, owner: OwnerId) -> Vec<RecordKey> {
        self.pending
            .lock()
            .iter()
            .filter(|(key, p)| key.table() == table && p.owner != owner)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Rows of a table committed after `snapshot`: (key, value at snapshot, latest value)
    pub(crate) fn table_changes_since(
        &self,
        table: &str,
        snapshot: u64,
    ) -> Vec<(RecordKey, Option<i64>, Option<i64>)> {
        let data = self.data.read();
        let start = RecordKey::new(table, "");
        data.range((Bound::Included(start), Bound::Unbounded))
            .take_while(|(key, _)| key.table() == table)
            .filter(|(_, chain)| chain.changed_since(snapshot))
            .map(|(key, chain)| {
                let before = chain.get_at_version(snapshot).and_then(|v| v.value);
                let after = chain.latest().and_then(|v| v.value);
                (key.clone(), before, after)
            })
            .collect()
    }

    /// Install a transaction's writes as one commit version
    pub(crate) fn apply(&self, owner: OwnerId, writes: &BTreeMap<RecordKey, Option<i64>>) -> u64 {
        if writes.is_empty() {
            return self.current_version();
        }
        let version = self.allocate_version();
        {
            let mut data = self.data.write();
            for (key, value) in writes {
                let stored = StoredVersion::new(version, *value);
                match data.get_mut(key) {
                    Some(chain) => chain.push(stored),
                    None => {
                        data.insert(key.clone(), VersionChain::new(stored));
                    }
                }
            }
        }
        self.clear_pending(owner);
        version
    }

    pub(crate) fn clear_pending(&self, owner: OwnerId) {
        self.pending.lock().retain(|_, p| p.owner != owner);
    }
}

/// In-process multi-version store with row locks
///
/// Cloning the handle shares the underlying data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store with the default lock timeout
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create an empty store with a lock-wait timeout
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(BTreeMap::new()),
                pending: Mutex::new(FxHashMap::default()),
                version: AtomicU64::new(0),
                locks: LockManager::new(timeout),
                commit_lock: Mutex::new(()),
                available: AtomicBool::new(true),
                next_owner: AtomicU64::new(1),
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a store holding `seed` as committed data
    pub fn seeded(seed: &[(RecordKey, i64)]) -> StoreResult<Self> {
        let store = Self::new();
        store.reset(seed)?;
        Ok(store)
    }

    /// Refuse or accept new sessions and transactions
    ///
    /// While unavailable, `connect` and `begin` fail with
    /// `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        info!(target: "txnlab::store", available, "store availability changed");
    }

    /// Current commit version
    pub fn current_version(&self) -> u64 {
        self.inner.current_version()
    }

    /// Number of open transactions
    pub fn active_transactions(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Owner of a key's row lock
    pub fn lock_holder(&self, key: &RecordKey) -> Option<OwnerId> {
        self.inner.locks.holder(key)
    }

    /// Number of committed versions kept for a key
    pub fn version_count(&self, key: &RecordKey) -> usize {
        self.inner
            .data
            .read()
            .get(key)
            .map_or(0, |chain| chain.version_count())
    }

    /// Drop versions no open snapshot can see
    pub fn gc(&self) {
        if self.active_transactions() > 0 {
            return;
        }
        let min = self.current_version();
        for chain in self.inner.data.write().values_mut() {
            chain.gc(min);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    type Session = MemorySession;

    fn connect(&self) -> StoreResult<MemorySession> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is not accepting connections".into()));
        }
        Ok(MemorySession::new(Arc::clone(&self.inner)))
    }

    fn reset(&self, seed: &[(RecordKey, i64)]) -> StoreResult<()> {
        if self.active_transactions() > 0 {
            return Err(StoreError::TransactionActive);
        }
        let _commit = self.inner.commit_lock.lock();
        let version = self.inner.allocate_version();
        {
            let mut data = self.inner.data.write();
            data.clear();
            for (key, value) in seed {
                data.insert(key.clone(), VersionChain::new(StoredVersion::live(version, *value)));
            }
        }
        self.inner.pending.lock().clear();
        self.inner.locks.clear();
        debug!(target: "txnlab::store", rows = seed.len(), version, "store reset");
        Ok(())
    }

    fn committed_value(&self, key: &RecordKey) -> StoreResult<Option<i64>> {
        Ok(self.inner.latest_committed(key).0)
    }
}
