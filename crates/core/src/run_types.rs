//! Run lifecycle types
//!
//! ## Design
//!
//! - `TxnStatus`: lifecycle of one transaction context (Started, Committed, RolledBack)
//! - `TransactionRun`: one context's record, mutated only by that context
//! - `Run`: two transaction records plus the merged trace; immutable
//!
//! ## Run Invariants
//!
//! | # | Invariant | Meaning |
//! |---|-----------|---------|
//! | R1 | Terminal | Both transactions are Committed or RolledBack |
//! | R2 | Contiguous | Sequence orders are 1..=n with no gaps |
//! | R3 | Frozen | No mutation after construction |
//!
//! `Run::seal` checks R1 and R2; R3 holds because fields are private.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::isolation::IsolationLevel;
use crate::scenario::{Interleaving, ScenarioKind, SumInvariant};
use crate::timestamp::Timestamp;
use crate::trace::{notes, EventKind, TraceEvent};
use crate::types::{RecordKey, RunId, TxnName};

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    /// BEGIN recorded, no terminal event yet
    Started,
    /// COMMIT recorded
    Committed,
    /// ROLLBACK recorded
    RolledBack,
}

impl TxnStatus {
    /// Committed or RolledBack
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxnStatus::Started)
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Started => "started",
            TxnStatus::Committed => "committed",
            TxnStatus::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of one transaction context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRun {
    /// T1 or T2
    pub name: TxnName,
    /// Isolation level the context ran at
    pub isolation_level: IsolationLevel,
    /// Current status
    pub status: TxnStatus,
    /// When BEGIN was recorded
    pub started_at: Timestamp,
    /// When the terminal event was recorded
    pub ended_at: Option<Timestamp>,
}

impl TransactionRun {
    /// Create a started transaction record
    pub fn new(name: TxnName, isolation_level: IsolationLevel, started_at: Timestamp) -> Self {
        TransactionRun {
            name,
            isolation_level,
            status: TxnStatus::Started,
            started_at,
            ended_at: None,
        }
    }

    /// Move to a terminal status
    ///
    /// Terminal records are never resurrected: a second transition fails
    /// with `InvalidState`.
    pub fn finish(&mut self, status: TxnStatus, ended_at: Timestamp) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "{} cannot move back to {}",
                self.name, status
            )));
        }
        if self.status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "{} is already {}",
                self.name, self.status
            )));
        }
        self.status = status;
        self.ended_at = Some(ended_at);
        Ok(())
    }

    /// Whether the transaction reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Duration between BEGIN and the terminal event
    pub fn duration_micros(&self) -> Option<u64> {
        self.ended_at
            .map(|e| e.as_micros().saturating_sub(self.started_at.as_micros()))
    }
}

/// Scenario-level facts recorded with a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    /// Variant executed
    pub variant: ScenarioKind,
    /// Scheduling mode
    pub interleaving: Interleaving,
    /// Shared invariant, set for write skew
    pub invariant: Option<SumInvariant>,
}

impl RunMeta {
    /// Metadata with no invariant
    pub fn new(variant: ScenarioKind, interleaving: Interleaving) -> Self {
        RunMeta {
            variant,
            interleaving,
            invariant: None,
        }
    }

    /// Attach an invariant
    pub fn with_invariant(mut self, invariant: SumInvariant) -> Self {
        self.invariant = Some(invariant);
        self
    }
}

/// A finished run: two transactions and their merged trace
///
/// The only input of the detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run {
    run_id: RunId,
    meta: RunMeta,
    transactions: [TransactionRun; 2],
    events: Vec<TraceEvent>,
}

impl Run {
    /// Freeze a run
    ///
    /// Fails with `RunNotTerminal` if a transaction is still started and with
    /// `InvalidState` if the sequence orders are not `1..=n`.
    pub fn seal(
        run_id: RunId,
        meta: RunMeta,
        t1: TransactionRun,
        t2: TransactionRun,
        events: Vec<TraceEvent>,
    ) -> Result<Run> {
        if t1.name != TxnName::T1 || t2.name != TxnName::T2 {
            return Err(Error::invalid_state("transactions must be T1 then T2"));
        }
        for txn in [&t1, &t2] {
            if !txn.is_terminal() {
                return Err(Error::RunNotTerminal {
                    run_id,
                    transaction: txn.name,
                });
            }
        }
        for (i, event) in events.iter().enumerate() {
            let expected = i as u64 + 1;
            if event.sequence_order != expected {
                return Err(Error::invalid_state(format!(
                    "sequence gap: expected {}, found {}",
                    expected, event.sequence_order
                )));
            }
        }
        Ok(Run {
            run_id,
            meta,
            transactions: [t1, t2],
            events,
        })
    }

    /// Run identifier
    pub fn id(&self) -> RunId {
        self.run_id
    }

    /// Variant executed
    pub fn variant(&self) -> ScenarioKind {
        self.meta.variant
    }

    /// Scheduling mode
    pub fn interleaving(&self) -> Interleaving {
        self.meta.interleaving
    }

    /// Shared invariant, if the variant has one
    pub fn invariant(&self) -> Option<&SumInvariant> {
        self.meta.invariant.as_ref()
    }

    /// Both transaction records, T1 first
    pub fn transactions(&self) -> &[TransactionRun; 2] {
        &self.transactions
    }

    /// One transaction record
    pub fn transaction(&self, name: TxnName) -> &TransactionRun {
        match name {
            TxnName::T1 => &self.transactions[0],
            TxnName::T2 => &self.transactions[1],
        }
    }

    /// The merged trace in sequence order
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Event by sequence number
    pub fn event(&self, sequence_order: u64) -> Option<&TraceEvent> {
        let index = usize::try_from(sequence_order.checked_sub(1)?).ok()?;
        self.events.get(index)
    }

    /// Events issued by one transaction
    pub fn events_of(&self, txn: TxnName) -> impl Iterator<Item = &TraceEvent> + '_ {
        self.events.iter().filter(move |e| e.is_by(txn))
    }

    /// The terminal event of a transaction
    pub fn terminal_event(&self, txn: TxnName) -> Option<&TraceEvent> {
        self.events_of(txn).find(|e| e.kind.is_terminal())
    }

    /// Final committed value recorded by a `final_state` marker
    pub fn final_value(&self, key: &RecordKey) -> Option<i64> {
        self.events
            .iter()
            .rev()
            .find(|e| e.is_marker() && e.has_note(notes::FINAL_STATE) && e.touches(key))
            .and_then(|e| e.old_value)
    }

    /// Transaction aborted by the store's deadlock detector
    pub fn victim(&self) -> Option<TxnName> {
        self.events
            .iter()
            .find(|e| e.kind == EventKind::Rollback && e.has_note(notes::DEADLOCK_VICTIM))
            .and_then(|e| e.transaction)
    }

    /// Whether a transaction committed
    pub fn committed(&self, txn: TxnName) -> bool {
        self.transaction(txn).status == TxnStatus::Committed
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the trace is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
