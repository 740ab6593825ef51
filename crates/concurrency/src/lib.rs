//! Concurrency primitives for txnlab
//!
//! This crate provides the two blocking primitives the simulator and the
//! store are built on:
//! - LockManager: exclusive row locks with wait-for graph deadlock detection
//! - Rendezvous: named, abandonable barriers that order two contexts

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;
pub mod rendezvous;

pub use lock::{CyclePath, LockManager, OwnerId, WaitForGraph};
pub use rendezvous::{Rendezvous, RendezvousError, RendezvousSet};
