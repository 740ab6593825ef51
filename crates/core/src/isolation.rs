//! Isolation levels and the anomaly prevention matrix
//!
//! The matrix describes the stores this engine drives: a genuine
//! READ UNCOMMITTED (uncommitted writes are visible), per-statement snapshots
//! at READ COMMITTED, a transaction snapshot with first-updater-wins at
//! REPEATABLE READ, and read-set validation at SERIALIZABLE.
//!
//! | Level | dirty | lost update | non-repeatable | phantom | write skew |
//! |-------|-------|-------------|----------------|---------|------------|
//! | READ UNCOMMITTED | possible | possible | possible | possible | possible |
//! | READ COMMITTED | prevented | possible | possible | possible | possible |
//! | REPEATABLE READ | prevented | prevented | prevented | prevented | possible |
//! | SERIALIZABLE | prevented | prevented | prevented | prevented | prevented |
//!
//! Deadlocks are not an isolation property and are never prevented.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::anomaly::AnomalyType;
use crate::error::Error;

/// Store-enforced isolation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Uncommitted writes of other transactions are visible
    ReadUncommitted,
    /// Every statement sees the latest committed data
    ReadCommitted,
    /// The whole transaction sees one snapshot
    RepeatableRead,
    /// Transactions behave as if executed one after another
    Serializable,
}

impl IsolationLevel {
    /// All levels, weakest first
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// SQL spelling (`READ COMMITTED`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Whether this level prevents an anomaly
    pub fn prevents(&self, anomaly: AnomalyType) -> bool {
        use AnomalyType::*;
        use IsolationLevel::*;
        match (self, anomaly) {
            (_, Deadlock) => false,
            (ReadUncommitted, _) => false,
            (ReadCommitted, DirtyRead) => true,
            (ReadCommitted, _) => false,
            (RepeatableRead, WriteSkew) => false,
            (RepeatableRead, _) => true,
            (Serializable, _) => true,
        }
    }

    /// Whether reads take one snapshot for the whole transaction
    pub fn uses_transaction_snapshot(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }

    /// One-line description
    pub fn description(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => {
                "Reads may observe uncommitted data of other transactions."
            }
            IsolationLevel::ReadCommitted => {
                "Each statement sees data committed before it began. Allows non-repeatable reads and phantoms."
            }
            IsolationLevel::RepeatableRead => {
                "Snapshot isolation: consistent reads for the whole transaction, concurrent updates of the same row abort."
            }
            IsolationLevel::Serializable => {
                "Reads are validated at commit; results equal some serial execution."
            }
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    /// Accepts `READ COMMITTED`, `read_committed` and `read-committed`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['_', '-'], " ");
        IsolationLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| Error::invalid_parameters(format!("unknown isolation level '{}'", s)))
    }
}
