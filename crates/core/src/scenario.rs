//! Scenario vocabulary: variants, per-transaction parameters, invariants
//!
//! A scenario variant fixes an isolation level and an interleaving protocol.
//! Everything scenario-specific that a detector rule needs to judge the
//! outcome (the write-skew invariant, the phantom predicate) is an explicit
//! value here rather than a constant buried in a rule.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::anomaly::AnomalyType;
use crate::error::{Error, Result};
use crate::isolation::IsolationLevel;
use crate::types::RecordKey;

/// The six scenario variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Read-modify-write race; the second commit overwrites the first
    LostUpdate,
    /// Read of an uncommitted write that is later rolled back
    DirtyRead,
    /// Re-read of a key after a concurrent committed update
    NonRepeatableRead,
    /// Re-run of a range query after a concurrent committed insert
    PhantomRead,
    /// Disjoint writes under a shared invariant at snapshot isolation
    WriteSkew,
    /// Opposite lock acquisition order
    Deadlock,
}

impl ScenarioKind {
    /// All variants
    pub const ALL: [ScenarioKind; 6] = [
        ScenarioKind::LostUpdate,
        ScenarioKind::DirtyRead,
        ScenarioKind::NonRepeatableRead,
        ScenarioKind::PhantomRead,
        ScenarioKind::WriteSkew,
        ScenarioKind::Deadlock,
    ];

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        self.expected_anomaly().as_str()
    }

    /// The anomaly this variant is built to reproduce
    pub fn expected_anomaly(&self) -> AnomalyType {
        match self {
            ScenarioKind::LostUpdate => AnomalyType::LostUpdate,
            ScenarioKind::DirtyRead => AnomalyType::DirtyRead,
            ScenarioKind::NonRepeatableRead => AnomalyType::NonRepeatableRead,
            ScenarioKind::PhantomRead => AnomalyType::PhantomRead,
            ScenarioKind::WriteSkew => AnomalyType::WriteSkew,
            ScenarioKind::Deadlock => AnomalyType::Deadlock,
        }
    }

    /// Isolation level both transactions run at
    pub fn isolation_level(&self) -> IsolationLevel {
        match self {
            ScenarioKind::DirtyRead => IsolationLevel::ReadUncommitted,
            ScenarioKind::WriteSkew => IsolationLevel::RepeatableRead,
            ScenarioKind::LostUpdate
            | ScenarioKind::NonRepeatableRead
            | ScenarioKind::PhantomRead
            | ScenarioKind::Deadlock => IsolationLevel::ReadCommitted,
        }
    }

    /// One-line description of the interleaving
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioKind::LostUpdate => "Both transactions update the same record from the same read",
            ScenarioKind::DirtyRead => "T2 reads data T1 has not committed, then T1 rolls back",
            ScenarioKind::NonRepeatableRead => "T2 reads a record twice and gets different values",
            ScenarioKind::PhantomRead => "T2 runs a range query twice and sees a new row",
            ScenarioKind::WriteSkew => "Overlapping reads, disjoint writes, broken invariant",
            ScenarioKind::Deadlock => "Each transaction waits for a lock the other holds",
        }
    }

    /// Default parameters reproducing the anomaly against the default seed
    pub fn default_params(&self) -> (TxnParams, TxnParams) {
        let a = RecordKey::account("A");
        let b = RecordKey::account("B");
        match self {
            ScenarioKind::LostUpdate => (
                TxnParams::new(50, [a.clone()]),
                TxnParams::new(-20, [a]),
            ),
            ScenarioKind::DirtyRead | ScenarioKind::NonRepeatableRead => (
                TxnParams::new(50, [a.clone()]),
                TxnParams::new(-20, [a]),
            ),
            ScenarioKind::PhantomRead => {
                let d = RecordKey::account("D");
                (TxnParams::new(120, [d.clone()]), TxnParams::new(0, [d]))
            }
            ScenarioKind::WriteSkew => (
                TxnParams::new(-250, [a.clone(), b.clone()]),
                TxnParams::new(-250, [b, a]),
            ),
            ScenarioKind::Deadlock => (
                TxnParams::new(10, [a.clone(), b.clone()]),
                TxnParams::new(20, [b, a]),
            ),
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ScenarioKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| Error::invalid_parameters(format!("unknown scenario variant '{}'", s)))
    }
}

/// How the two contexts are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interleaving {
    /// Both contexts run in parallel, ordered by rendezvous barriers
    #[default]
    Concurrent,
    /// Barriers disabled: T1 runs to completion before T2 starts
    Sequential,
}

/// Parameters of one transaction
///
/// `amount` is a delta applied to the transaction's primary key (the first
/// key); for the phantom variant it is the balance of the inserted row.
/// The order of `keys` matters: it is the access/lock order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnParams {
    /// Numeric amount
    pub amount: i64,
    /// Target records, primary key first
    pub keys: Vec<RecordKey>,
}

impl TxnParams {
    /// Create parameters
    pub fn new(amount: i64, keys: impl IntoIterator<Item = RecordKey>) -> Self {
        Self {
            amount,
            keys: keys.into_iter().collect(),
        }
    }

    /// First key, the one the transaction writes
    pub fn primary_key(&self) -> Option<&RecordKey> {
        self.keys.first()
    }

    /// Keys as a set
    pub fn key_set(&self) -> BTreeSet<&RecordKey> {
        self.keys.iter().collect()
    }

    /// Keys shared with another transaction, in this transaction's order
    pub fn overlap<'a>(&'a self, other: &TxnParams) -> Vec<&'a RecordKey> {
        let theirs = other.key_set();
        self.keys.iter().filter(|k| theirs.contains(k)).collect()
    }
}

/// Invariant `sum(keys) >= floor`
///
/// The shared constraint of the write-skew variant. Supplied by scenario
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumInvariant {
    /// Records whose balances are summed
    pub keys: Vec<RecordKey>,
    /// Minimum allowed sum
    pub floor: i64,
}

impl SumInvariant {
    /// Create an invariant
    pub fn new(keys: impl IntoIterator<Item = RecordKey>, floor: i64) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            floor,
        }
    }

    /// Sum of the invariant's keys, `None` if any key has no value
    pub fn sum<F>(&self, mut value_of: F) -> Option<i64>
    where
        F: FnMut(&RecordKey) -> Option<i64>,
    {
        self.keys
            .iter()
            .try_fold(0i64, |acc, key| value_of(key).map(|v| acc.saturating_add(v)))
    }

    /// Whether the invariant holds, `None` if it cannot be evaluated
    pub fn holds<F>(&self, value_of: F) -> Option<bool>
    where
        F: FnMut(&RecordKey) -> Option<i64>,
    {
        self.sum(value_of).map(|s| s >= self.floor)
    }

    /// Whether a key participates in the invariant
    pub fn covers(&self, key: &RecordKey) -> bool {
        self.keys.contains(key)
    }
}

impl fmt::Display for SumInvariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        write!(f, "sum({}) >= {}", keys.join(", "), self.floor)
    }
}

/// Range predicate over the balances of one table
///
/// `min <= balance <= max`, each bound optional.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangePredicate {
    /// Table scanned
    pub table: String,
    /// Inclusive lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    /// Inclusive upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl RangePredicate {
    /// Predicate `balance >= min` over a table
    pub fn at_least(table: impl Into<String>, min: i64) -> Self {
        Self {
            table: table.into(),
            min: Some(min),
            max: None,
        }
    }

    /// Whether a row with this key and balance matches
    pub fn matches(&self, key: &RecordKey, value: i64) -> bool {
        key.table() == self.table
            && self.min.map_or(true, |min| value >= min)
            && self.max.map_or(true, |max| value <= max)
    }

    /// Reject empty ranges
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(Error::invalid_parameters("range predicate needs a table"));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(Error::invalid_parameters(format!(
                    "range predicate is empty: {} > {}",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for RangePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) => write!(f, "{}[{}<=balance<={}]", self.table, min, max),
            (Some(min), None) => write!(f, "{}[balance>={}]", self.table, min),
            (None, Some(max)) => write!(f, "{}[balance<={}]", self.table, max),
            (None, None) => write!(f, "{}[*]", self.table),
        }
    }
}
