//! Row lock manager with wait-for graph deadlock detection
//!
//! Exclusive row locks, held until the owning transaction commits or rolls
//! back. A request for a lock held by another owner blocks on a condvar
//! until the lock is released or the lock-wait timeout expires.
//!
//! ## Deadlock detection
//!
//! Every blocked request adds an edge `waiter -> holder` to the wait-for
//! graph. A waiter blocks on at most one lock, so the graph is a functional
//! graph and a cycle check is a walk along holder edges. The request that
//! would close a cycle is refused with `StoreError::Deadlock`: the requester
//! is the victim. Its caller must roll back, which releases the victim's locks
//! and wakes the survivor.
//!
//! All state lives behind one mutex; the edge insert, the cycle check and
//! the wait decision are atomic with respect to other requests.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use txnlab_core::{RecordKey, StoreError, StoreResult};

/// Identifier of a lock owner (one store session's current transaction)
pub type OwnerId = u64;

/// Cycle path, usually two owners long
pub type CyclePath = SmallVec<[OwnerId; 4]>;

/// Waiter -> holder edges
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: FxHashMap<OwnerId, OwnerId>,
}

impl WaitForGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `waiter` waits for `holder`, replacing any previous edge
    pub fn add_edge(&mut self, waiter: OwnerId, holder: OwnerId) {
        self.edges.insert(waiter, holder);
    }

    /// Remove the outgoing edge of `waiter`
    pub fn remove_waiter(&mut self, waiter: OwnerId) {
        self.edges.remove(&waiter);
    }

    /// Owner `waiter` currently waits for
    pub fn waits_for(&self, waiter: OwnerId) -> Option<OwnerId> {
        self.edges.get(&waiter).copied()
    }

    /// Cycle that an edge `waiter -> holder` would close
    ///
    /// Walks from `holder` along wait edges; returns the path
    /// `[waiter, holder, ...]` if the walk reaches `waiter`.
    pub fn cycle_through(&self, waiter: OwnerId, holder: OwnerId) -> Option<CyclePath> {
        let mut path = CyclePath::new();
        path.push(waiter);
        let mut current = holder;
        // Bounded by the number of waiters: each owner has at most one edge
        for _ in 0..=self.edges.len() {
            if current == waiter {
                return Some(path);
            }
            path.push(current);
            current = self.edges.get(&current).copied()?;
        }
        None
    }

    /// Number of blocked owners
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Check if nobody is waiting
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    holders: FxHashMap<RecordKey, OwnerId>,
    graph: WaitForGraph,
}

/// Exclusive row lock manager
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    timeout: Duration,
}

impl LockManager {
    /// Create a lock manager with a lock-wait timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Lock-wait timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the exclusive lock on `key` for `owner`
    ///
    /// Re-entrant: an owner already holding the lock returns immediately.
    ///
    /// # Errors
    ///
    /// - `Deadlock` if waiting would close a wait-for cycle
    /// - `LockTimeout` if the lock is not released within the timeout
    pub fn acquire(&self, owner: OwnerId, key: &RecordKey) -> StoreResult<()> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut table = self.table.lock();

        loop {
            let holder = match table.holders.get(key).copied() {
                None => {
                    table.holders.insert(key.clone(), owner);
                    table.graph.remove_waiter(owner);
                    debug!(target: "txnlab::lock", owner, key = %key, "lock acquired");
                    return Ok(());
                }
                Some(holder) if holder == owner => return Ok(()),
                Some(holder) => holder,
            };

            if let Some(cycle) = table.graph.cycle_through(owner, holder) {
                table.graph.remove_waiter(owner);
                let path: Vec<String> = cycle.iter().map(|o| o.to_string()).collect();
                warn!(
                    target: "txnlab::lock",
                    victim = owner,
                    key = %key,
                    cycle = %path.join(" -> "),
                    "deadlock detected, aborting requester"
                );
                return Err(StoreError::Deadlock(format!(
                    "owner {} waiting for {} held by {} closes cycle {}",
                    owner,
                    key,
                    holder,
                    path.join(" -> ")
                )));
            }

            table.graph.add_edge(owner, holder);
            debug!(target: "txnlab::lock", owner, holder, key = %key, "waiting for lock");

            if self.released.wait_until(&mut table, deadline).timed_out() {
                // Released exactly at the deadline: take it
                if !table.holders.contains_key(key) {
                    continue;
                }
                table.graph.remove_waiter(owner);
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(target: "txnlab::lock", owner, key = %key, waited_ms, "lock wait timeout");
                return Err(StoreError::LockTimeout {
                    key: key.clone(),
                    waited_ms,
                });
            }
        }
    }

    /// Release every lock held by `owner` and wake all waiters
    ///
    /// Returns the number of locks released.
    pub fn release_all(&self, owner: OwnerId) -> usize {
        let released = {
            let mut table = self.table.lock();
            let before = table.holders.len();
            table.holders.retain(|_, holder| *holder != owner);
            table.graph.remove_waiter(owner);
            before - table.holders.len()
        };
        if released > 0 {
            debug!(target: "txnlab::lock", owner, released, "locks released");
        }
        self.released.notify_all();
        released
    }

    /// Current holder of a key's lock
    pub fn holder(&self, key: &RecordKey) -> Option<OwnerId> {
        self.table.lock().holders.get(key).copied()
    }

    /// Number of locks held by an owner
    pub fn held_by(&self, owner: OwnerId) -> usize {
        self.table
            .lock()
            .holders
            .values()
            .filter(|holder| **holder == owner)
            .count()
    }

    /// Number of blocked requests
    pub fn waiting(&self) -> usize {
        self.table.lock().graph.len()
    }

    /// Drop every lock and wait edge
    pub fn clear(&self) {
        {
            let mut table = self.table.lock();
            table.holders.clear();
            table.graph = WaitForGraph::new();
        }
        self.released.notify_all();
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("LockManager")
            .field("held", &table.holders.len())
            .field("waiting", &table.graph.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
