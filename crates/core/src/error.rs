//! Error types for txnlab
//!
//! Two layers of errors are defined here, both with `thiserror`:
//!
//! - [`StoreError`]: what a transactional store reports for a single
//!   operation (lock timeouts, deadlock aborts, serialization failures, ...)
//! - [`Error`]: the engine taxonomy surfaced to callers of `simulate`/`detect`
//!
//! | Variant | Fatal to | Retried |
//! |---------|----------|---------|
//! | `InvalidParameters` | request (before any store interaction) | never |
//! | `StoreUnavailable` | run | never |
//! | `StoreConflict` | run (outside the deadlock scenario) | never |
//! | `DeadlockVictim` | nothing, recovered inside the deadlock scenario | - |
//! | `RuleEvaluation` | one detector rule only | - |

use crate::types::{RecordKey, RunId, TxnName};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by a transactional store for one operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or refused a new session
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The lock manager aborted this transaction to break a wait-for cycle
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// A row lock could not be acquired before the lock-wait timeout
    #[error("lock wait timeout on {key} after {waited_ms}ms")]
    LockTimeout {
        /// Record whose lock was requested
        key: RecordKey,
        /// How long the request waited
        waited_ms: u64,
    },

    /// A concurrent update made this transaction unserializable
    #[error("could not serialize access on {key}: {reason}")]
    SerializationFailure {
        /// Record on which the conflict was found
        key: RecordKey,
        /// Human-readable reason
        reason: String,
    },

    /// The record does not exist
    #[error("record not found: {0}")]
    NotFound(RecordKey),

    /// An insert targeted an existing record
    #[error("duplicate key: {0}")]
    DuplicateKey(RecordKey),

    /// An operation required an open transaction
    #[error("no transaction in progress")]
    NoActiveTransaction,

    /// `begin` was called while a transaction was already open
    #[error("transaction already in progress")]
    TransactionActive,

    /// The transaction already failed; only rollback is accepted
    #[error("current transaction is aborted, commands ignored until rollback")]
    TransactionAborted,
}

impl StoreError {
    /// Whether this failure is a concurrency conflict (lock or serialization)
    ///
    /// Conflicts are the failures the deadlock scenario expects and every
    /// other scenario treats as a misconfiguration.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Deadlock(_)
                | StoreError::LockTimeout { .. }
                | StoreError::SerializationFailure { .. }
        )
    }

    /// Whether the store itself is unreachable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Error taxonomy surfaced by the engine
#[derive(Debug, Error)]
pub enum Error {
    /// Request rejected before touching the store
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Store connection failure
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unexpected lock or serialization failure outside the deadlock scenario
    #[error("{transaction} hit a store conflict during {operation}: {source}")]
    StoreConflict {
        /// Context that received the failure
        transaction: TxnName,
        /// Operation being executed (for example `write accounts:A`)
        operation: String,
        /// Underlying store failure
        #[source]
        source: StoreError,
    },

    /// Expected lock-manager abort inside the deadlock scenario
    #[error("{transaction} was chosen as deadlock victim: {source}")]
    DeadlockVictim {
        /// Context that was aborted
        transaction: TxnName,
        /// Store failure that aborted it
        #[source]
        source: StoreError,
    },

    /// Any other store failure attributed to a context and operation
    #[error("{transaction} failed during {operation}: {source}")]
    Store {
        /// Context that received the failure
        transaction: TxnName,
        /// Operation being executed
        operation: String,
        /// Underlying store failure
        #[source]
        source: StoreError,
    },

    /// A detector rule failed; other rules are unaffected
    #[error("rule {rule} failed: {reason}")]
    RuleEvaluation {
        /// Rule name
        rule: String,
        /// Failure reason
        reason: String,
    },

    /// A context stopped waiting because its counterpart failed
    #[error("{transaction} interrupted at rendezvous '{point}'")]
    Interrupted {
        /// Context that was waiting
        transaction: TxnName,
        /// Rendezvous point name
        point: String,
    },

    /// Run id is not known to the collector
    #[error("unknown run {0}")]
    UnknownRun(RunId),

    /// Finalize was requested before a transaction reached a terminal status
    #[error("run {run_id} cannot be finalized: {transaction} is not terminal")]
    RunNotTerminal {
        /// Run being finalized
        run_id: RunId,
        /// Transaction still open
        transaction: TxnName,
    },

    /// Illegal lifecycle transition
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be read or is malformed
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Construct an `InvalidParameters` error
    pub fn invalid_parameters(msg: impl Into<String>) -> Self {
        Error::InvalidParameters(msg.into())
    }

    /// Construct an `InvalidState` error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Construct a `Config` error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Attribute a store failure to a context and operation
    ///
    /// Unavailability maps to `StoreUnavailable`, conflicts to
    /// `StoreConflict`, everything else to `Store`.
    pub fn from_store(
        transaction: TxnName,
        operation: impl Into<String>,
        source: StoreError,
    ) -> Self {
        match source {
            StoreError::Unavailable(msg) => Error::StoreUnavailable(msg),
            source if source.is_conflict() => Error::StoreConflict {
                transaction,
                operation: operation.into(),
                source,
            },
            source => Error::Store {
                transaction,
                operation: operation.into(),
                source,
            },
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidParameters(_) => "InvalidParameters",
            Error::StoreUnavailable(_) => "StoreUnavailable",
            Error::StoreConflict { .. } => "StoreConflict",
            Error::DeadlockVictim { .. } => "DeadlockVictim",
            Error::Store { .. } => "StoreError",
            Error::RuleEvaluation { .. } => "RuleEvaluationError",
            Error::Interrupted { .. } => "Interrupted",
            Error::UnknownRun(_) => "UnknownRun",
            Error::RunNotTerminal { .. } => "RunNotTerminal",
            Error::InvalidState(_) => "InvalidState",
            Error::Config(_) => "Config",
        }
    }

    /// Whether this error is the interruption of a waiting context
    ///
    /// Interruptions are a consequence of a counterpart failure and are never
    /// the root cause reported for a run.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Error::Interrupted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_conflict_classification() {
        let key = RecordKey::account("A");
        assert!(StoreError::Deadlock("cycle".into()).is_conflict());
        assert!(StoreError::LockTimeout {
            key: key.clone(),
            waited_ms: 10
        }
        .is_conflict());
        assert!(StoreError::SerializationFailure {
            key: key.clone(),
            reason: "concurrent update".into()
        }
        .is_conflict());
        assert!(!StoreError::NotFound(key).is_conflict());
        assert!(!StoreError::Unavailable("down".into()).is_conflict());
        assert!(StoreError::Unavailable("down".into()).is_unavailable());
    }

    #[test]
    fn test_from_store_maps_unavailable() {
        let err = Error::from_store(
            TxnName::T1,
            "begin",
            StoreError::Unavailable("refused".into()),
        );
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(err.error_code(), "StoreUnavailable");
    }

    #[test]
    fn test_from_store_maps_conflict_with_context() {
        let err = Error::from_store(
            TxnName::T2,
            "write accounts:A",
            StoreError::SerializationFailure {
                key: RecordKey::account("A"),
                reason: "concurrent update".into(),
            },
        );
        match &err {
            Error::StoreConflict {
                transaction,
                operation,
                ..
            } => {
                assert_eq!(*transaction, TxnName::T2);
                assert_eq!(operation, "write accounts:A");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        let msg = err.to_string();
        assert!(msg.contains("T2"));
        assert!(msg.contains("write accounts:A"));
    }

    #[test]
    fn test_from_store_maps_other_failures() {
        let err = Error::from_store(
            TxnName::T1,
            "read accounts:Z",
            StoreError::NotFound(RecordKey::account("Z")),
        );
        assert!(matches!(err, Error::Store { .. }));
    }

    #[test]
    fn test_error_display_invalid_parameters() {
        let err = Error::invalid_parameters("no overlapping key");
        let msg = err.to_string();
        assert!(msg.contains("invalid parameters"));
        assert!(msg.contains("no overlapping key"));
    }

    #[test]
    fn test_interruption_flag() {
        let err = Error::Interrupted {
            transaction: TxnName::T1,
            point: "t2_read".into(),
        };
        assert!(err.is_interruption());
        assert!(!Error::invalid_state("x").is_interruption());
    }
}
