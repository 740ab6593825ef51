//! MemorySession: one connection to a `MemoryStore`
//!
//! A session runs at most one transaction at a time. Every transaction gets
//! a fresh lock owner id, so a session reused across runs never inherits
//! locks.
//!
//! A lock or serialization failure aborts the transaction: later operations
//! fail with `TransactionAborted` until `rollback`. A commit that fails
//! validation ends the transaction.

use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use txnlab_concurrency::OwnerId;
use txnlab_core::{IsolationLevel, RangePredicate, RecordKey, StoreError, StoreResult, StoreSession};

use crate::memory::{PendingWrite, StoreInner};

#[derive(Debug)]
struct TxnState {
    owner: OwnerId,
    isolation: IsolationLevel,
    /// Commit version visible at begin
    snapshot: u64,
    /// Buffered writes, `None` for delete
    writes: BTreeMap<RecordKey, Option<i64>>,
    /// Keys read with the committed version observed
    read_set: FxHashMap<RecordKey, u64>,
    range_reads: Vec<RangePredicate>,
    aborted: bool,
}

impl TxnState {
    fn ensure_live(&self) -> StoreResult<()> {
        if self.aborted {
            Err(StoreError::TransactionAborted)
        } else {
            Ok(())
        }
    }

    /// Record a failure, aborting on conflicts
    fn fail(&mut self, err: StoreError) -> StoreError {
        if err.is_conflict() {
            self.aborted = true;
        }
        err
    }
}

/// A session on a [`MemoryStore`](crate::MemoryStore)
#[derive(Debug)]
pub struct MemorySession {
    inner: Arc<StoreInner>,
    txn: Option<TxnState>,
}

impl MemorySession {
    pub(crate) fn new(inner: Arc<StoreInner>) -> Self {
        Self { inner, txn: None }
    }

    /// Lock owner of the open transaction
    pub fn owner(&self) -> Option<OwnerId> {
        self.txn.as_ref().map(|t| t.owner)
    }

    /// Isolation level of the open transaction
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.txn.as_ref().map(|t| t.isolation)
    }

    fn open_txn(txn: &mut Option<TxnState>) -> StoreResult<&mut TxnState> {
        let state = txn.as_mut().ok_or(StoreError::NoActiveTransaction)?;
        state.ensure_live()?;
        Ok(state)
    }

    /// Value visible to the transaction and the committed version it came from
    ///
    /// Own writes report version `None`: they are not part of the read set.
    fn visible(inner: &StoreInner, txn: &TxnState, key: &RecordKey) -> (Option<i64>, Option<u64>) {
        if let Some(own) = txn.writes.get(key) {
            return (*own, None);
        }
        let (value, version) = match txn.isolation {
            IsolationLevel::ReadUncommitted => match inner.foreign_pending(key, txn.owner) {
                Some(PendingWrite { value, .. }) => return (value, None),
                None => inner.latest_committed(key),
            },
            IsolationLevel::ReadCommitted => inner.latest_committed(key),
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                inner.committed_at(key, txn.snapshot)
            }
        };
        (value, Some(version))
    }

    /// Take the row lock and enforce first-updater-wins at snapshot levels
    fn lock_for_update(inner: &StoreInner, txn: &mut TxnState, key: &RecordKey) -> StoreResult<()> {
        if let Err(e) = inner.locks.acquire(txn.owner, key) {
            return Err(txn.fail(e));
        }
        if txn.isolation.uses_transaction_snapshot()
            && !txn.writes.contains_key(key)
            && inner.changed_since(key, txn.snapshot)
        {
            warn!(target: "txnlab::store", owner = txn.owner, key = %key, "concurrent update, aborting");
            return Err(txn.fail(StoreError::SerializationFailure {
                key: key.clone(),
                reason: "concurrent update after snapshot".into(),
            }));
        }
        Ok(())
    }

    fn buffer_write(inner: &StoreInner, txn: &mut TxnState, key: &RecordKey, value: Option<i64>) {
        txn.writes.insert(key.clone(), value);
        inner.pending.lock().insert(
            key.clone(),
            PendingWrite {
                owner: txn.owner,
                value,
            },
        );
    }

    /// Check read set and range reads against commits after the snapshot
    fn validate(inner: &StoreInner, txn: &TxnState) -> StoreResult<()> {
        for key in txn.read_set.keys() {
            if inner.changed_since(key, txn.snapshot) {
                return Err(StoreError::SerializationFailure {
                    key: key.clone(),
                    reason: "read set changed by a concurrent commit".into(),
                });
            }
        }
        for predicate in &txn.range_reads {
            let changes = inner.table_changes_since(&predicate.table, txn.snapshot);
            let hit = changes.into_iter().find(|(key, before, after)| {
                before.map_or(false, |v| predicate.matches(key, v))
                    || after.map_or(false, |v| predicate.matches(key, v))
            });
            if let Some((key, _, _)) = hit {
                return Err(StoreError::SerializationFailure {
                    key,
                    reason: format!("range {} changed by a concurrent commit", predicate),
                });
            }
        }
        Ok(())
    }

    /// Drop buffered writes and locks of a finished transaction
    fn finish(&self, txn: &TxnState) {
        self.inner.clear_pending(txn.owner);
        self.inner.locks.release_all(txn.owner);
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StoreSession for MemorySession {
    fn begin(&mut self, isolation: IsolationLevel) -> StoreResult<()> {
        if self.txn.is_some() {
            return Err(StoreError::TransactionActive);
        }
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is not accepting transactions".into()));
        }
        let owner = self.inner.next_owner.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.inner.current_version();
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        debug!(target: "txnlab::store", owner, snapshot, isolation = %isolation, "begin");
        self.txn = Some(TxnState {
            owner,
            isolation,
            snapshot,
            writes: BTreeMap::new(),
            read_set: FxHashMap::default(),
            range_reads: Vec::new(),
            aborted: false,
        });
        Ok(())
    }

    fn read(&mut self, key: &RecordKey) -> StoreResult<Option<i64>> {
        let txn = Self::open_txn(&mut self.txn)?;
        let (value, version) = Self::visible(&self.inner, txn, key);
        if let Some(version) = version {
            txn.read_set.entry(key.clone()).or_insert(version);
        }
        Ok(value)
    }

    fn read_range(&mut self, predicate: &RangePredicate) -> StoreResult<Vec<(RecordKey, i64)>> {
        let txn = Self::open_txn(&mut self.txn)?;
        let mut candidates: BTreeSet<RecordKey> =
            self.inner.table_keys(&predicate.table).into_iter().collect();
        candidates.extend(
            txn.writes
                .keys()
                .filter(|k| k.table() == predicate.table)
                .cloned(),
        );
        if txn.isolation == IsolationLevel::ReadUncommitted {
            candidates.extend(self.inner.foreign_pending_keys(&predicate.table, txn.owner));
        }

        let rows = candidates
            .into_iter()
            .filter_map(|key| {
                let (value, _) = Self::visible(&self.inner, txn, &key);
                value
                    .filter(|v| predicate.matches(&key, *v))
                    .map(|v| (key, v))
            })
            .collect();
        txn.range_reads.push(predicate.clone());
        Ok(rows)
    }

    fn lock_exclusive(&mut self, key: &RecordKey) -> StoreResult<Option<i64>> {
        let txn = Self::open_txn(&mut self.txn)?;
        Self::lock_for_update(&self.inner, txn, key)?;
        let (value, version) = Self::visible(&self.inner, txn, key);
        if let Some(version) = version {
            txn.read_set.entry(key.clone()).or_insert(version);
        }
        Ok(value)
    }

    fn write(&mut self, key: &RecordKey, value: i64) -> StoreResult<i64> {
        let txn = Self::open_txn(&mut self.txn)?;
        Self::lock_for_update(&self.inner, txn, key)?;
        // Under the row lock the latest committed row is the one replaced
        let current = match txn.writes.get(key) {
            Some(own) => *own,
            None => self.inner.latest_committed(key).0,
        };
        let old = current.ok_or_else(|| StoreError::NotFound(key.clone()))?;
        Self::buffer_write(&self.inner, txn, key, Some(value));
        Ok(old)
    }

    fn insert(&mut self, key: &RecordKey, value: i64) -> StoreResult<()> {
        let txn = Self::open_txn(&mut self.txn)?;
        Self::lock_for_update(&self.inner, txn, key)?;
        let exists = match txn.writes.get(key) {
            Some(own) => own.is_some(),
            None => self.inner.latest_committed(key).0.is_some(),
        };
        if exists {
            return Err(StoreError::DuplicateKey(key.clone()));
        }
        Self::buffer_write(&self.inner, txn, key, Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &RecordKey) -> StoreResult<i64> {
        let txn = Self::open_txn(&mut self.txn)?;
        Self::lock_for_update(&self.inner, txn, key)?;
        let current = match txn.writes.get(key) {
            Some(own) => *own,
            None => self.inner.latest_committed(key).0,
        };
        let old = current.ok_or_else(|| StoreError::NotFound(key.clone()))?;
        Self::buffer_write(&self.inner, txn, key, None);
        Ok(old)
    }

    fn commit(&mut self) -> StoreResult<()> {
        let txn = self.txn.take().ok_or(StoreError::NoActiveTransaction)?;
        if txn.aborted {
            self.finish(&txn);
            return Err(StoreError::TransactionAborted);
        }

        let outcome = {
            let _commit = self.inner.commit_lock.lock();
            let validated = if txn.isolation == IsolationLevel::Serializable {
                Self::validate(&self.inner, &txn)
            } else {
                Ok(())
            };
            validated.map(|()| self.inner.apply(txn.owner, &txn.writes))
        };
        self.finish(&txn);

        match outcome {
            Ok(version) => {
                debug!(target: "txnlab::store", owner = txn.owner, version, writes = txn.writes.len(), "commit");
                Ok(())
            }
            Err(e) => {
                warn!(target: "txnlab::store", owner = txn.owner, error = %e, "commit validation failed");
                Err(e)
            }
        }
    }

    fn rollback(&mut self) -> StoreResult<()> {
        let txn = self.txn.take().ok_or(StoreError::NoActiveTransaction)?;
        self.finish(&txn);
        debug!(target: "txnlab::store", owner = txn.owner, discarded = txn.writes.len(), "rollback");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            self.finish(&txn);
        }
    }
}
