//! Simulation engine for txnlab
//!
//! This crate ties the lower layers together:
//! - TraceCollector: totally ordered, per-run event log
//! - Simulator: executes scenario variants as two concurrent contexts
//! - EngineConfig: `txnlab.toml` loading and validation
//!
//! The engine is the only component that knows how a variant is scheduled.
//! Detection works on the frozen `Run` it returns and never sees the store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collector;
pub mod config;
pub mod simulator;

pub use collector::{TraceCollector, FIRST_SEQUENCE};
pub use config::{EngineConfig, PhantomConfig, SeedRow, WriteSkewConfig, CONFIG_FILE_NAME};
pub use simulator::Simulator;
