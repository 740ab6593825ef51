//! Storage layer for txnlab
//!
//! This crate implements the in-process transactional store the simulator
//! drives by default:
//! - MemoryStore: multi-version rows, row locks, all four isolation levels
//! - MemorySession: one connection, one transaction at a time
//! - VersionChain: newest-first MVCC history of one row

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod session;
pub mod version;

pub use memory::{MemoryStore, DEFAULT_LOCK_TIMEOUT};
pub use session::MemorySession;
pub use version::{StoredVersion, VersionChain};
