//! Anomaly catalog and detector findings
//!
//! `AnomalyType` names the six concurrency anomalies the engine reproduces.
//! `Anomaly` is one finding produced by the detector for one run; it points
//! into the run's trace by sequence number only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::isolation::IsolationLevel;
use crate::types::TxnName;

/// The six concurrency anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    /// A transaction observed another transaction's uncommitted write
    DirtyRead,
    /// A committed write was overwritten by a write computed from stale data
    LostUpdate,
    /// Two reads of one key inside one transaction returned different values
    NonRepeatableRead,
    /// Two executions of one range query returned different row sets
    PhantomRead,
    /// Disjoint writes based on overlapping reads jointly broke an invariant
    WriteSkew,
    /// The lock manager aborted a transaction to break a wait-for cycle
    Deadlock,
}

impl AnomalyType {
    /// All anomaly types, in detector evaluation order
    pub const ALL: [AnomalyType; 6] = [
        AnomalyType::DirtyRead,
        AnomalyType::LostUpdate,
        AnomalyType::NonRepeatableRead,
        AnomalyType::PhantomRead,
        AnomalyType::WriteSkew,
        AnomalyType::Deadlock,
    ];

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::DirtyRead => "dirty_read",
            AnomalyType::LostUpdate => "lost_update",
            AnomalyType::NonRepeatableRead => "non_repeatable_read",
            AnomalyType::PhantomRead => "phantom_read",
            AnomalyType::WriteSkew => "write_skew",
            AnomalyType::Deadlock => "deadlock",
        }
    }

    /// Lowest isolation level that prevents this anomaly
    ///
    /// `None` for deadlocks: no isolation level prevents them, only a
    /// consistent lock acquisition order does.
    pub fn recommended_isolation(&self) -> Option<IsolationLevel> {
        IsolationLevel::ALL
            .into_iter()
            .find(|level| level.prevents(*self))
    }

    /// Short remediation hint shown next to a finding
    pub fn remediation(&self) -> &'static str {
        match self {
            AnomalyType::DirtyRead => "run readers at READ COMMITTED or above",
            AnomalyType::LostUpdate => {
                "use REPEATABLE READ, or lock the row (SELECT ... FOR UPDATE) before the read-modify-write"
            }
            AnomalyType::NonRepeatableRead => "use REPEATABLE READ so the transaction reads one snapshot",
            AnomalyType::PhantomRead => "use REPEATABLE READ or SERIALIZABLE for repeated range queries",
            AnomalyType::WriteSkew => {
                "use SERIALIZABLE, or materialize the invariant as a row both transactions update"
            }
            AnomalyType::Deadlock => "acquire locks in one global order in every transaction",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnomalyType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::invalid_parameters(format!("unknown anomaly type '{}'", s)))
    }
}

/// How bad a finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Low,
    /// Inconsistent view, no corrupted state
    Medium,
    /// Committed state is wrong or work was aborted
    High,
    /// A value that never existed durably was observed
    Critical,
}

impl Severity {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detector finding
///
/// Owned by the caller that requested detection. `event_refs` is an ordered
/// subsequence of the run's sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Which anomaly was found
    pub anomaly_type: AnomalyType,
    /// How bad it is
    pub severity: Severity,
    /// Transactions involved, sorted
    pub affected_transactions: Vec<TxnName>,
    /// Implicated events, ascending sequence order
    pub event_refs: Vec<u64>,
    /// Human-readable description
    pub description: String,
}

impl Anomaly {
    /// Create a finding, normalizing the transaction set and event order
    pub fn new(
        anomaly_type: AnomalyType,
        severity: Severity,
        affected_transactions: impl IntoIterator<Item = TxnName>,
        event_refs: impl IntoIterator<Item = u64>,
        description: impl Into<String>,
    ) -> Self {
        let mut affected: Vec<TxnName> = affected_transactions.into_iter().collect();
        affected.sort();
        affected.dedup();
        let mut refs: Vec<u64> = event_refs.into_iter().collect();
        refs.sort_unstable();
        refs.dedup();
        Self {
            anomaly_type,
            severity,
            affected_transactions: affected,
            event_refs: refs,
            description: description.into(),
        }
    }

    /// Whether a transaction is implicated
    pub fn affects(&self, txn: TxnName) -> bool {
        self.affected_transactions.contains(&txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_type_names_roundtrip() {
        for t in AnomalyType::ALL {
            assert_eq!(t.as_str().parse::<AnomalyType>().unwrap(), t);
        }
        assert!("race".parse::<AnomalyType>().is_err());
    }

    #[test]
    fn test_anomaly_type_serde_is_snake_case() {
        let json = serde_json::to_string(&AnomalyType::NonRepeatableRead).unwrap();
        assert_eq!(json, "\"non_repeatable_read\"");
    }

    #[test]
    fn test_recommended_isolation() {
        assert_eq!(
            AnomalyType::DirtyRead.recommended_isolation(),
            Some(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            AnomalyType::LostUpdate.recommended_isolation(),
            Some(IsolationLevel::RepeatableRead)
        );
        assert_eq!(
            AnomalyType::WriteSkew.recommended_isolation(),
            Some(IsolationLevel::Serializable)
        );
        assert_eq!(AnomalyType::Deadlock.recommended_isolation(), None);
    }

    #[test]
    fn test_anomaly_new_normalizes() {
        let a = Anomaly::new(
            AnomalyType::LostUpdate,
            Severity::High,
            [TxnName::T2, TxnName::T1, TxnName::T2],
            [7, 3, 7, 5],
            "lost",
        );
        assert_eq!(a.affected_transactions, vec![TxnName::T1, TxnName::T2]);
        assert_eq!(a.event_refs, vec![3, 5, 7]);
        assert!(a.affects(TxnName::T1));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert_eq!(Severity::Critical.to_string(), "critical");
    }
}
