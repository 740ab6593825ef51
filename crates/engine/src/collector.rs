//! Trace collector
//!
//! Append-only, totally ordered event log per run. Each run sits behind its
//! own mutex; taking that mutex is the single serialization point at which
//! an event receives its sequence number, so sequence order equals receipt
//! order and has no gaps. Different runs never contend.
//!
//! The collector also owns the two `TransactionRun` records of each run and
//! advances them from the BEGIN / COMMIT / ROLLBACK events it records, so a
//! transaction's status and its trace can never disagree.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use txnlab_core::{
    Error, EventDraft, EventKind, IsolationLevel, Result, Run, RunId, RunMeta, Timestamp,
    TraceEvent, TransactionRun, TxnName, TxnStatus,
};

/// First sequence number of every run
pub const FIRST_SEQUENCE: u64 = 1;

#[derive(Debug)]
struct RunTrace {
    meta: RunMeta,
    next_sequence: u64,
    last_timestamp: Timestamp,
    events: Vec<TraceEvent>,
    transactions: [Option<TransactionRun>; 2],
}

impl RunTrace {
    fn new(meta: RunMeta) -> Self {
        Self {
            meta,
            next_sequence: FIRST_SEQUENCE,
            last_timestamp: Timestamp::EPOCH,
            events: Vec::new(),
            transactions: [None, None],
        }
    }

    fn slot(&mut self, txn: TxnName) -> &mut Option<TransactionRun> {
        match txn {
            TxnName::T1 => &mut self.transactions[0],
            TxnName::T2 => &mut self.transactions[1],
        }
    }

    /// Apply the lifecycle effect of an event before it is appended
    fn advance(&mut self, draft: &EventDraft, at: Timestamp) -> Result<()> {
        let Some(txn) = draft.transaction else {
            return Ok(());
        };
        let slot = self.slot(txn);
        match (draft.kind, slot.as_mut()) {
            (EventKind::Begin, None) => {
                let isolation = draft
                    .note
                    .as_deref()
                    .and_then(|n| n.parse::<IsolationLevel>().ok())
                    .unwrap_or(IsolationLevel::ReadCommitted);
                *slot = Some(TransactionRun::new(txn, isolation, at));
                Ok(())
            }
            (EventKind::Begin, Some(_)) => Err(Error::invalid_state(format!(
                "{} already began in this run",
                txn
            ))),
            (_, None) => Err(Error::invalid_state(format!(
                "{} recorded {} before BEGIN",
                txn, draft.kind
            ))),
            (EventKind::Commit, Some(run)) => run.finish(TxnStatus::Committed, at),
            (EventKind::Rollback, Some(run)) => run.finish(TxnStatus::RolledBack, at),
            (_, Some(run)) if run.is_terminal() => Err(Error::invalid_state(format!(
                "{} recorded {} after it ended",
                txn, draft.kind
            ))),
            (_, Some(_)) => Ok(()),
        }
    }

    fn get(&self, txn: TxnName) -> Option<&TransactionRun> {
        match txn {
            TxnName::T1 => self.transactions[0].as_ref(),
            TxnName::T2 => self.transactions[1].as_ref(),
        }
    }

    fn unfinished(&self) -> Option<TxnName> {
        TxnName::ALL
            .into_iter()
            .find(|name| !self.get(*name).map_or(false, |t| t.is_terminal()))
    }
}

/// Collects the traces of concurrently executing runs
#[derive(Debug, Default)]
pub struct TraceCollector {
    runs: DashMap<RunId, Arc<Mutex<RunTrace>>>,
}

impl TraceCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new run
    pub fn begin_run(&self, meta: RunMeta) -> RunId {
        let run_id = RunId::new();
        info!(target: "txnlab::collector", run_id = %run_id, variant = %meta.variant, "run opened");
        self.runs
            .insert(run_id, Arc::new(Mutex::new(RunTrace::new(meta))));
        run_id
    }

    fn trace(&self, run_id: RunId) -> Result<Arc<Mutex<RunTrace>>> {
        self.runs
            .get(&run_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::UnknownRun(run_id))
    }

    /// Append an event and return its sequence number
    ///
    /// Safe to call from both contexts concurrently.
    ///
    /// # Errors
    ///
    /// - `UnknownRun` if the run was never opened or is already finalized
    /// - `InvalidState` if the event violates the transaction lifecycle
    pub fn record(&self, run_id: RunId, draft: EventDraft) -> Result<u64> {
        let trace = self.trace(run_id)?;
        let mut trace = trace.lock();

        let at = Timestamp::monotonic_after(trace.last_timestamp);
        trace.advance(&draft, at)?;

        let sequence = trace.next_sequence;
        trace.next_sequence += 1;
        trace.last_timestamp = at;
        let event = draft.into_event(sequence, at);
        debug!(target: "txnlab::collector", run_id = %run_id, "{}", event);
        trace.events.push(event);
        Ok(sequence)
    }

    /// Copy of the events recorded so far
    pub fn events(&self, run_id: RunId) -> Result<Vec<TraceEvent>> {
        Ok(self.trace(run_id)?.lock().events.clone())
    }

    /// Status of a transaction in an open run
    pub fn status(&self, run_id: RunId, txn: TxnName) -> Result<Option<TxnStatus>> {
        let trace = self.trace(run_id)?;
        let trace = trace.lock();
        Ok(trace.get(txn).map(|t| t.status))
    }

    /// Freeze a run and hand it over
    ///
    /// Only succeeds once both transactions are terminal. On success the run
    /// leaves the collector; later `record` calls fail with `UnknownRun`.
    ///
    /// # Errors
    ///
    /// `RunNotTerminal` naming the first unfinished transaction.
    pub fn finalize(&self, run_id: RunId) -> Result<Run> {
        {
            let trace = self.trace(run_id)?;
            let trace = trace.lock();
            if let Some(transaction) = trace.unfinished() {
                return Err(Error::RunNotTerminal {
                    run_id,
                    transaction,
                });
            }
        }
        let (_, trace) = self.runs.remove(&run_id).ok_or(Error::UnknownRun(run_id))?;
        let mut trace = trace.lock();
        let events = std::mem::take(&mut trace.events);
        let [t1, t2] = std::mem::take(&mut trace.transactions);
        let missing = |name| Error::RunNotTerminal {
            run_id,
            transaction: name,
        };
        let t1 = t1.ok_or_else(|| missing(TxnName::T1))?;
        let t2 = t2.ok_or_else(|| missing(TxnName::T2))?;
        let run = Run::seal(run_id, trace.meta.clone(), t1, t2, events)?;
        info!(target: "txnlab::collector", run_id = %run_id, events = run.len(), "run finalized");
        Ok(run)
    }

    /// Drop a run without finalizing it
    pub fn discard(&self, run_id: RunId) -> bool {
        let removed = self.runs.remove(&run_id).is_some();
        if removed {
            debug!(target: "txnlab::collector", run_id = %run_id, "run discarded");
        }
        removed
    }

    /// Number of open runs
    pub fn open_runs(&self) -> usize {
        self.runs.len()
    }
}
