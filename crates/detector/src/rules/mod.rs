//! Anomaly rules
//!
//! One rule per anomaly type. Rules are pure functions of a run: they never
//! look at the store, never share state, and report at most one finding.
//! A rule that cannot decide returns a `RuleError` instead of guessing.

mod deadlock;
mod dirty_read;
mod lost_update;
mod non_repeatable_read;
mod phantom_read;
mod write_skew;

use serde::{Deserialize, Serialize};
use std::fmt;

use txnlab_core::{Anomaly, AnomalyType, Run, TraceEvent};

use crate::error::RuleError;
use crate::index::TraceIndex;

/// Result of one rule
pub type RuleResult = Result<Option<Anomaly>, RuleError>;

/// A detection rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyRule {
    /// Read of another transaction's uncommitted write
    DirtyRead,
    /// Committed write computed from a read that predates another commit
    LostUpdate,
    /// Two reads of a key split by another transaction's commit
    NonRepeatableRead,
    /// Two scans of a predicate split by a matching insert or delete
    PhantomRead,
    /// Disjoint writes that jointly break an invariant
    WriteSkew,
    /// Store-forced rollback
    Deadlock,
}

impl AnomalyRule {
    /// Every rule, in evaluation order
    pub const ALL: [AnomalyRule; 6] = [
        AnomalyRule::DirtyRead,
        AnomalyRule::LostUpdate,
        AnomalyRule::NonRepeatableRead,
        AnomalyRule::PhantomRead,
        AnomalyRule::WriteSkew,
        AnomalyRule::Deadlock,
    ];

    /// Anomaly this rule reports
    pub fn anomaly_type(&self) -> AnomalyType {
        match self {
            AnomalyRule::DirtyRead => AnomalyType::DirtyRead,
            AnomalyRule::LostUpdate => AnomalyType::LostUpdate,
            AnomalyRule::NonRepeatableRead => AnomalyType::NonRepeatableRead,
            AnomalyRule::PhantomRead => AnomalyType::PhantomRead,
            AnomalyRule::WriteSkew => AnomalyType::WriteSkew,
            AnomalyRule::Deadlock => AnomalyType::Deadlock,
        }
    }

    /// Evaluate against a run
    pub fn evaluate(&self, run: &Run) -> RuleResult {
        self.evaluate_indexed(&TraceIndex::new(run))
    }

    /// Evaluate against an existing index
    pub fn evaluate_indexed(&self, index: &TraceIndex<'_>) -> RuleResult {
        match self {
            AnomalyRule::DirtyRead => dirty_read::evaluate(index),
            AnomalyRule::LostUpdate => lost_update::evaluate(index),
            AnomalyRule::NonRepeatableRead => non_repeatable_read::evaluate(index),
            AnomalyRule::PhantomRead => phantom_read::evaluate(index),
            AnomalyRule::WriteSkew => write_skew::evaluate(index),
            AnomalyRule::Deadlock => deadlock::evaluate(index),
        }
    }
}

impl fmt::Display for AnomalyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.anomaly_type().as_str())
    }
}

/// Sequence numbers of a set of events
fn refs<'e>(events: impl IntoIterator<Item = &'e TraceEvent>) -> Vec<u64> {
    events.into_iter().map(|e| e.sequence_order).collect()
}

fn value(v: Option<i64>) -> String {
    v.map_or_else(|| "<none>".to_string(), |v| v.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Hand-built runs for rule tests

    use txnlab_core::{
        EventDraft, EventKind, Interleaving, IsolationLevel, Run, RunId, RunMeta, ScenarioKind,
        SumInvariant, Timestamp, TransactionRun, TxnName, TxnStatus,
    };

    /// Seal a run from drafts; statuses come from the terminal drafts
    pub(crate) fn build(kind: ScenarioKind, invariant: Option<SumInvariant>, drafts: Vec<EventDraft>) -> Run {
        let status = |txn: TxnName| {
            drafts
                .iter()
                .find(|d| d.transaction == Some(txn) && d.kind.is_terminal())
                .map(|d| match d.kind {
                    EventKind::Commit => TxnStatus::Committed,
                    _ => TxnStatus::RolledBack,
                })
                .unwrap_or(TxnStatus::RolledBack)
        };
        let done = |txn: TxnName| {
            let mut t = TransactionRun::new(txn, IsolationLevel::ReadCommitted, Timestamp::EPOCH);
            t.finish(status(txn), Timestamp::from_micros(1_000)).unwrap();
            t
        };
        let (t1, t2) = (done(TxnName::T1), done(TxnName::T2));
        let mut meta = RunMeta::new(kind, Interleaving::Concurrent);
        if let Some(invariant) = invariant {
            meta = meta.with_invariant(invariant);
        }
        let events = drafts
            .into_iter()
            .enumerate()
            .map(|(i, d)| d.into_event(i as u64 + 1, Timestamp::from_micros(i as u64 + 1)))
            .collect();
        Run::seal(RunId::new(), meta, t1, t2, events).unwrap()
    }

    pub(crate) fn begin(txn: TxnName) -> EventDraft {
        EventDraft::begin(txn, IsolationLevel::ReadCommitted)
    }
}
