//! Transaction context
//!
//! A context owns one store session and records every operation it performs
//! with the collector, immediately after the store acknowledges it. Store
//! failures are attributed to the context and the operation being executed.

use tracing::{debug, warn};

use txnlab_concurrency::{RendezvousError, RendezvousSet};
use txnlab_core::{
    notes, Error, EventDraft, IsolationLevel, RangePredicate, RecordKey, Result, RunId, StoreError,
    StoreSession, TxnName,
};

use crate::collector::TraceCollector;

/// One transaction's view of a run
pub(crate) struct TxnContext<'a, S: StoreSession> {
    name: TxnName,
    isolation: IsolationLevel,
    session: S,
    collector: &'a TraceCollector,
    run_id: RunId,
    points: RendezvousSet,
}

impl<'a, S: StoreSession> TxnContext<'a, S> {
    pub(crate) fn new(
        name: TxnName,
        isolation: IsolationLevel,
        session: S,
        collector: &'a TraceCollector,
        run_id: RunId,
        points: RendezvousSet,
    ) -> Self {
        Self {
            name,
            isolation,
            session,
            collector,
            run_id,
            points,
        }
    }

    pub(crate) fn name(&self) -> TxnName {
        self.name
    }

    fn record(&self, draft: EventDraft) -> Result<u64> {
        self.collector.record(self.run_id, draft)
    }

    fn store_err(&self, operation: impl Into<String>, source: StoreError) -> Error {
        Error::from_store(self.name, operation, source)
    }

    pub(crate) fn begin(&mut self) -> Result<()> {
        self.session
            .begin(self.isolation)
            .map_err(|e| self.store_err("begin", e))?;
        self.record(EventDraft::begin(self.name, self.isolation))?;
        Ok(())
    }

    pub(crate) fn read(&mut self, key: &RecordKey) -> Result<Option<i64>> {
        let value = self
            .session
            .read(key)
            .map_err(|e| self.store_err(format!("read {}", key), e))?;
        self.record(EventDraft::read(self.name, key.clone(), value))?;
        Ok(value)
    }

    /// Read a key that must exist
    pub(crate) fn read_existing(&mut self, key: &RecordKey) -> Result<i64> {
        self.read(key)?
            .ok_or_else(|| self.store_err(format!("read {}", key), StoreError::NotFound(key.clone())))
    }

    pub(crate) fn read_range(&mut self, predicate: &RangePredicate) -> Result<Vec<(RecordKey, i64)>> {
        let rows = self
            .session
            .read_range(predicate)
            .map_err(|e| self.store_err(format!("scan {}", predicate), e))?;
        self.record(EventDraft::read_range(self.name, predicate.clone(), rows.len()))?;
        Ok(rows)
    }

    /// `SELECT ... FOR UPDATE`
    pub(crate) fn lock_for_update(&mut self, key: &RecordKey) -> Result<i64> {
        let value = self
            .session
            .lock_exclusive(key)
            .map_err(|e| self.store_err(format!("lock {}", key), e))?
            .ok_or_else(|| self.store_err(format!("lock {}", key), StoreError::NotFound(key.clone())))?;
        self.record(EventDraft::read(self.name, key.clone(), Some(value)).with_note(notes::FOR_UPDATE))?;
        Ok(value)
    }

    pub(crate) fn write(&mut self, key: &RecordKey, value: i64) -> Result<i64> {
        let old = self
            .session
            .write(key, value)
            .map_err(|e| self.store_err(format!("write {}", key), e))?;
        self.record(EventDraft::write(self.name, key.clone(), Some(old), value))?;
        Ok(old)
    }

    pub(crate) fn insert(&mut self, key: &RecordKey, value: i64) -> Result<()> {
        self.session
            .insert(key, value)
            .map_err(|e| self.store_err(format!("insert {}", key), e))?;
        self.record(EventDraft::insert(self.name, key.clone(), value))?;
        Ok(())
    }

    /// Commit; a refused commit ends the transaction as a rollback
    pub(crate) fn commit(&mut self) -> Result<()> {
        match self.session.commit() {
            Ok(()) => {
                self.record(EventDraft::commit(self.name))?;
                Ok(())
            }
            Err(e) => {
                warn!(target: "txnlab::sim", txn = %self.name, error = %e, "commit refused");
                self.record(EventDraft::rollback(self.name).with_note(notes::ABORTED))?;
                Err(self.store_err("commit", e))
            }
        }
    }

    /// Roll back, recording the event while the row locks are still held
    ///
    /// A waiter blocked on one of our rows can only record its acquisition
    /// after this ROLLBACK.
    pub(crate) fn rollback(&mut self, note: Option<&str>) -> Result<()> {
        if !self.session.in_transaction() {
            return Err(self.store_err("rollback", StoreError::NoActiveTransaction));
        }
        let draft = EventDraft::rollback(self.name);
        self.record(match note {
            Some(note) => draft.with_note(note),
            None => draft,
        })?;
        self.session
            .rollback()
            .map_err(|e| self.store_err("rollback", e))
    }

    /// Block at a rendezvous point until the counterpart arrives
    pub(crate) fn wait(&self, point: &str) -> Result<()> {
        debug!(target: "txnlab::sim", txn = %self.name, point, "waiting");
        self.points.wait(point).map_err(|e| match e {
            RendezvousError::Abandoned { point } => Error::Interrupted {
                transaction: self.name,
                point,
            },
            other => Error::invalid_state(format!("{}: {}", self.name, other)),
        })
    }

    /// Release the counterpart and roll back whatever is still open
    ///
    /// Called once after a failure. Cleanup errors are logged, never returned.
    pub(crate) fn abort_open(&mut self) {
        self.points.abandon_all();
        if !self.session.in_transaction() {
            return;
        }
        let recorded = self.collector.status(self.run_id, self.name);
        if matches!(recorded, Ok(Some(status)) if !status.is_terminal()) {
            if let Err(e) = self.record(EventDraft::rollback(self.name).with_note(notes::ABORTED)) {
                warn!(target: "txnlab::sim", txn = %self.name, error = %e, "cleanup rollback not recorded");
            }
        }
        if let Err(e) = self.session.rollback() {
            warn!(target: "txnlab::sim", txn = %self.name, error = %e, "cleanup rollback failed");
        }
    }
}
