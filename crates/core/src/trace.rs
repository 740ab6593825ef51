//! Trace events
//!
//! A `TraceEvent` is one operation observed by the collector. Events are
//! built as an [`EventDraft`] by the acting context and stamped with a
//! sequence number and timestamp at the collector's serialization point.
//!
//! Value conventions:
//! - READ: the observed value is in `old_value` (`None` if the row was absent)
//! - range READ: `predicate` is set, `target_key` is `None`, and the row count
//!   is the observed value
//! - WRITE update: `old_value` -> `new_value`
//! - WRITE insert: `old_value` is `None`
//! - WRITE delete: `new_value` is `None`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::isolation::IsolationLevel;
use crate::scenario::RangePredicate;
use crate::timestamp::Timestamp;
use crate::types::{RecordKey, TxnName};

/// Well-known event notes
pub mod notes {
    /// ROLLBACK forced by the store's deadlock detector
    pub const DEADLOCK_VICTIM: &str = "deadlock_victim";
    /// Run-level READ marker carrying a final committed value
    pub const FINAL_STATE: &str = "final_state";
    /// ROLLBACK issued because the transaction's own write would break the invariant
    pub const INVARIANT_GUARD: &str = "invariant_guard";
    /// READ that also took an exclusive row lock (`SELECT ... FOR UPDATE`)
    pub const FOR_UPDATE: &str = "for_update";
    /// ROLLBACK issued after a failed operation
    pub const ABORTED: &str = "aborted";
}

/// Operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    /// Transaction start
    Begin,
    /// Point or range read
    Read,
    /// Update, insert or delete
    Write,
    /// Successful commit
    Commit,
    /// Rollback (voluntary or forced)
    Rollback,
}

impl EventKind {
    /// Uppercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Begin => "BEGIN",
            EventKind::Read => "READ",
            EventKind::Write => "WRITE",
            EventKind::Commit => "COMMIT",
            EventKind::Rollback => "ROLLBACK",
        }
    }

    /// COMMIT or ROLLBACK
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Commit | EventKind::Rollback)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position in the run's total order, starting at 1
    pub sequence_order: u64,
    /// Acting transaction, `None` for run-level markers
    pub transaction: Option<TxnName>,
    /// Operation kind
    pub kind: EventKind,
    /// Record touched, if any
    pub target_key: Option<RecordKey>,
    /// Observed value (READ) or value before the write (WRITE)
    pub old_value: Option<i64>,
    /// Value after the write
    pub new_value: Option<i64>,
    /// Wall-clock time of recording, informational only
    pub timestamp: Timestamp,
    /// Free-form annotation
    pub note: Option<String>,
    /// Predicate evaluated by a range READ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<RangePredicate>,
}

impl TraceEvent {
    /// Value observed by a READ
    pub fn observed_value(&self) -> Option<i64> {
        match self.kind {
            EventKind::Read => self.old_value,
            _ => None,
        }
    }

    /// Whether this event was issued by a transaction
    pub fn is_by(&self, txn: TxnName) -> bool {
        self.transaction == Some(txn)
    }

    /// Whether the event carries a given note
    pub fn has_note(&self, note: &str) -> bool {
        self.note.as_deref() == Some(note)
    }

    /// Run-level marker (no transaction)
    pub fn is_marker(&self) -> bool {
        self.transaction.is_none()
    }

    /// Point READ of a key
    pub fn is_point_read(&self) -> bool {
        self.kind == EventKind::Read && self.predicate.is_none() && self.target_key.is_some()
    }

    /// Range READ
    pub fn is_range_read(&self) -> bool {
        self.kind == EventKind::Read && self.predicate.is_some()
    }

    /// WRITE creating a row
    pub fn is_insert(&self) -> bool {
        self.kind == EventKind::Write && self.old_value.is_none() && self.new_value.is_some()
    }

    /// WRITE removing a row
    pub fn is_delete(&self) -> bool {
        self.kind == EventKind::Write && self.old_value.is_some() && self.new_value.is_none()
    }

    /// Whether the event touches a key
    pub fn touches(&self, key: &RecordKey) -> bool {
        self.target_key.as_ref() == Some(key)
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actor = self.transaction.map_or("--", |t| t.as_str());
        write!(f, "#{:<3} {} {:<8}", self.sequence_order, actor, self.kind.as_str())?;
        if let Some(key) = &self.target_key {
            write!(f, " {}", key)?;
        }
        if let Some(predicate) = &self.predicate {
            write!(f, " {}", predicate)?;
        }
        match (self.kind, self.old_value, self.new_value) {
            (EventKind::Read, Some(v), _) => write!(f, " = {}", v)?,
            (EventKind::Read, None, _) if self.target_key.is_some() => f.write_str(" = <none>")?,
            (EventKind::Write, old, new) => {
                let show = |v: Option<i64>| v.map_or_else(|| "<none>".to_string(), |v| v.to_string());
                write!(f, " {} -> {}", show(old), show(new))?;
            }
            _ => {}
        }
        if let Some(note) = &self.note {
            write!(f, " [{}]", note)?;
        }
        Ok(())
    }
}

/// An event before it is stamped by the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    /// Acting transaction, `None` for markers
    pub transaction: Option<TxnName>,
    /// Operation kind
    pub kind: EventKind,
    /// Record touched
    pub target_key: Option<RecordKey>,
    /// Observed or previous value
    pub old_value: Option<i64>,
    /// New value
    pub new_value: Option<i64>,
    /// Annotation
    pub note: Option<String>,
    /// Range predicate
    pub predicate: Option<RangePredicate>,
}

impl EventDraft {
    fn new(transaction: Option<TxnName>, kind: EventKind) -> Self {
        Self {
            transaction,
            kind,
            target_key: None,
            old_value: None,
            new_value: None,
            note: None,
            predicate: None,
        }
    }

    /// BEGIN, annotated with the isolation level
    pub fn begin(txn: TxnName, isolation: IsolationLevel) -> Self {
        Self::new(Some(txn), EventKind::Begin).with_note(isolation.as_str())
    }

    /// Point READ
    pub fn read(txn: TxnName, key: RecordKey, observed: Option<i64>) -> Self {
        let mut draft = Self::new(Some(txn), EventKind::Read);
        draft.target_key = Some(key);
        draft.old_value = observed;
        draft
    }

    /// Range READ; the row count is the observed value
    pub fn read_range(txn: TxnName, predicate: RangePredicate, row_count: usize) -> Self {
        let mut draft = Self::new(Some(txn), EventKind::Read);
        draft.predicate = Some(predicate);
        draft.old_value = Some(i64::try_from(row_count).unwrap_or(i64::MAX));
        draft
    }

    /// Update of an existing row
    pub fn write(txn: TxnName, key: RecordKey, old: Option<i64>, new: i64) -> Self {
        let mut draft = Self::new(Some(txn), EventKind::Write);
        draft.target_key = Some(key);
        draft.old_value = old;
        draft.new_value = Some(new);
        draft
    }

    /// Insert of a new row
    pub fn insert(txn: TxnName, key: RecordKey, value: i64) -> Self {
        Self::write(txn, key, None, value)
    }

    /// Delete of a row
    pub fn delete(txn: TxnName, key: RecordKey, old: i64) -> Self {
        let mut draft = Self::new(Some(txn), EventKind::Write);
        draft.target_key = Some(key);
        draft.old_value = Some(old);
        draft
    }

    /// COMMIT
    pub fn commit(txn: TxnName) -> Self {
        Self::new(Some(txn), EventKind::Commit)
    }

    /// ROLLBACK
    pub fn rollback(txn: TxnName) -> Self {
        Self::new(Some(txn), EventKind::Rollback)
    }

    /// Run-level marker with the final committed value of a key
    pub fn final_state(key: RecordKey, value: Option<i64>) -> Self {
        let mut draft = Self::new(None, EventKind::Read).with_note(notes::FINAL_STATE);
        draft.target_key = Some(key);
        draft.old_value = value;
        draft
    }

    /// Attach a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Stamp with a sequence number and timestamp
    pub fn into_event(self, sequence_order: u64, timestamp: Timestamp) -> TraceEvent {
        TraceEvent {
            sequence_order,
            transaction: self.transaction,
            kind: self.kind,
            target_key: self.target_key,
            old_value: self.old_value,
            new_value: self.new_value,
            timestamp,
            note: self.note,
            predicate: self.predicate,
        }
    }
}
