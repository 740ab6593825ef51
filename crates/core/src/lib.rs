//! Core types and traits for txnlab
//!
//! This crate defines the foundational types used throughout the system:
//! - RunId, TxnName, RecordKey: identifiers
//! - Timestamp: informational wall-clock time of trace events
//! - IsolationLevel: store isolation levels and the prevention matrix
//! - AnomalyType, Anomaly: the anomaly catalog and detector findings
//! - TraceEvent, EventDraft: recorded operations
//! - TransactionRun, Run: run lifecycle and the frozen run handed to detection
//! - ScenarioKind, TxnParams, SumInvariant, RangePredicate: scenario vocabulary
//! - Error, StoreError: error hierarchy
//! - Store, StoreSession: the store abstraction the simulator drives

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod anomaly;
pub mod error;
pub mod isolation;
pub mod run_types;
pub mod scenario;
pub mod timestamp;
pub mod trace;
pub mod traits;
pub mod types;

pub use anomaly::{Anomaly, AnomalyType, Severity};
pub use error::{Error, Result, StoreError, StoreResult};
pub use isolation::IsolationLevel;
pub use run_types::{Run, RunMeta, TransactionRun, TxnStatus};
pub use scenario::{Interleaving, RangePredicate, ScenarioKind, SumInvariant, TxnParams};
pub use timestamp::Timestamp;
pub use trace::{notes, EventDraft, EventKind, TraceEvent};
pub use traits::{Store, StoreSession};
pub use types::{RecordKey, RunId, TxnName};
