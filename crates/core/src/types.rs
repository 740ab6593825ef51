//! Identifier types for txnlab
//!
//! This module defines the foundational identifiers:
//! - RunId: Unique identifier for one simulation run
//! - TxnName: Which of the two logical transactions (T1/T2) acted
//! - RecordKey: Composite record identifier (`table:row`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Unique identifier for a simulation run
///
/// A RunId is a wrapper around a UUID v4. Every run gets its own trace and its
/// own pair of transactions; nothing is shared between two RunIds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RunId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse a RunId from a string representation
    ///
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the raw bytes of this RunId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of one of the two logical transactions in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TxnName {
    /// First transaction
    T1,
    /// Second transaction
    T2,
}

impl TxnName {
    /// Both transaction names, in order
    pub const ALL: [TxnName; 2] = [TxnName::T1, TxnName::T2];

    /// The counterpart transaction
    pub fn other(&self) -> TxnName {
        match self {
            TxnName::T1 => TxnName::T2,
            TxnName::T2 => TxnName::T1,
        }
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnName::T1 => "T1",
            TxnName::T2 => "T2",
        }
    }
}

impl fmt::Display for TxnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record identifier: a table name and a row name
///
/// Displayed and parsed as `table:row` (for example `accounts:A`).
/// Ordering is table first, then row, which keeps range scans over one table
/// contiguous in a `BTreeMap`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    table: String,
    row: String,
}

impl RecordKey {
    /// Create a new record key
    pub fn new(table: impl Into<String>, row: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            row: row.into(),
        }
    }

    /// Convenience constructor for the `accounts` table
    pub fn account(row: impl Into<String>) -> Self {
        Self::new("accounts", row)
    }

    /// Table this record lives in
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Row identifier within the table
    pub fn row(&self) -> &str {
        &self.row
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.row)
    }
}

impl FromStr for RecordKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((table, row)) if !table.is_empty() && !row.is_empty() && !row.contains(':') => {
                Ok(RecordKey::new(table, row))
            }
            _ => Err(Error::invalid_parameters(format!(
                "record key '{}' must have the form table:row",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_unique() {
        let a = RunId::new();
        let b = RunId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_run_id_string_roundtrip() {
        let id = RunId::new();
        let parsed = RunId::from_string(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(RunId::from_string("not-a-uuid").is_none());
    }

    #[test]
    fn test_txn_name_other() {
        assert_eq!(TxnName::T1.other(), TxnName::T2);
        assert_eq!(TxnName::T2.other(), TxnName::T1);
        assert_eq!(TxnName::T1.to_string(), "T1");
    }

    #[test]
    fn test_record_key_display_and_parse() {
        let key = RecordKey::account("A");
        assert_eq!(key.to_string(), "accounts:A");
        let parsed: RecordKey = "accounts:A".parse().unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.table(), "accounts");
        assert_eq!(parsed.row(), "A");
    }

    #[test]
    fn test_record_key_parse_rejects_malformed() {
        assert!("accounts".parse::<RecordKey>().is_err());
        assert!(":A".parse::<RecordKey>().is_err());
        assert!("accounts:".parse::<RecordKey>().is_err());
        assert!("a:b:c".parse::<RecordKey>().is_err());
    }

    #[test]
    fn test_record_key_ordering_groups_tables() {
        let mut keys = vec![
            RecordKey::new("b", "1"),
            RecordKey::new("a", "2"),
            RecordKey::new("a", "1"),
        ];
        keys.sort();
        assert_eq!(keys[0], RecordKey::new("a", "1"));
        assert_eq!(keys[1], RecordKey::new("a", "2"));
        assert_eq!(keys[2], RecordKey::new("b", "1"));
    }
}
