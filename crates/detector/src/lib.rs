//! Anomaly detection for txnlab
//!
//! Detection is a pure function of a finalized `Run`:
//! - TraceIndex: per-key and per-transaction views over the event stream
//! - AnomalyRule: one rule per anomaly type, each reporting at most one finding
//! - Detector: evaluates rules in isolation; a failing rule never blocks the rest
//!
//! Nothing here touches a store or a clock, so the same run always yields
//! the same report.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod detector;
pub mod error;
pub mod index;
pub mod rules;

pub use detector::{detect, DetectionReport, Detector};
pub use error::RuleError;
pub use index::TraceIndex;
pub use rules::{AnomalyRule, RuleResult};
