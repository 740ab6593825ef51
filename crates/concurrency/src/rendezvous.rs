//! Named rendezvous points
//!
//! A `Rendezvous` is a reusable-once barrier for a fixed number of parties
//! with a name that shows up in logs and errors. Unlike `std::sync::Barrier`
//! it can be abandoned: when one party fails, every current and future waiter
//! is released with `RendezvousError::Abandoned` instead of blocking forever.
//!
//! A disabled rendezvous never blocks. Sequential execution uses disabled
//! points so protocol code is identical in both modes. Without a timeout a
//! waiter blocks until release or abandonment.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;

/// Rendezvous failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RendezvousError {
    /// Another party gave up
    #[error("rendezvous '{point}' abandoned")]
    Abandoned {
        /// Rendezvous name
        point: String,
    },

    /// The other parties did not arrive in time
    #[error("rendezvous '{point}' timed out after {waited_ms}ms")]
    TimedOut {
        /// Rendezvous name
        point: String,
        /// How long the party waited
        waited_ms: u64,
    },

    /// No rendezvous with this name in the set
    #[error("unknown rendezvous '{0}'")]
    Unknown(String),
}

impl RendezvousError {
    /// Name of the rendezvous involved
    pub fn point(&self) -> &str {
        match self {
            RendezvousError::Abandoned { point } | RendezvousError::TimedOut { point, .. } => point,
            RendezvousError::Unknown(point) => point,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    arrived: usize,
    released: bool,
    abandoned: bool,
}

/// A named barrier for `parties` threads
#[derive(Debug)]
pub struct Rendezvous {
    name: String,
    parties: usize,
    enabled: bool,
    timeout: Option<Duration>,
    state: Mutex<State>,
    cond: Condvar,
}

impl Rendezvous {
    /// Create an enabled rendezvous; `None` waits without a deadline
    pub fn new(name: impl Into<String>, parties: usize, timeout: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            parties,
            enabled: true,
            timeout,
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    /// Create a rendezvous whose `wait` returns immediately
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::new(name, 1, None)
        }
    }

    /// Name of this point
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `wait` blocks
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Block until all parties arrived
    ///
    /// Once released, later calls return immediately.
    pub fn wait(&self) -> Result<(), RendezvousError> {
        if !self.enabled {
            return Ok(());
        }
        let started = Instant::now();
        let mut state = self.state.lock();
        if state.abandoned {
            return Err(self.abandoned());
        }
        if state.released {
            return Ok(());
        }

        state.arrived += 1;
        trace!(target: "txnlab::sim", point = %self.name, arrived = state.arrived, "rendezvous arrival");
        if state.arrived >= self.parties {
            state.released = true;
            self.cond.notify_all();
            return Ok(());
        }

        while !state.released && !state.abandoned {
            let Some(timeout) = self.timeout else {
                self.cond.wait(&mut state);
                continue;
            };
            if self.cond.wait_until(&mut state, started + timeout).timed_out() {
                if state.released || state.abandoned {
                    break;
                }
                state.arrived -= 1;
                return Err(RendezvousError::TimedOut {
                    point: self.name.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
        if state.released {
            Ok(())
        } else {
            Err(self.abandoned())
        }
    }

    /// Release every waiter with `Abandoned`
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        if !state.released {
            state.abandoned = true;
        }
        self.cond.notify_all();
    }

    /// Whether the rendezvous was abandoned before release
    pub fn is_abandoned(&self) -> bool {
        self.state.lock().abandoned
    }

    fn abandoned(&self) -> RendezvousError {
        RendezvousError::Abandoned {
            point: self.name.clone(),
        }
    }
}

/// The ordered rendezvous points of one protocol
///
/// Shared by both contexts of a run through `Arc`.
#[derive(Debug, Clone)]
pub struct RendezvousSet {
    points: Arc<Vec<Rendezvous>>,
}

impl RendezvousSet {
    /// Create enabled points for two parties
    pub fn new(names: &[&str], timeout: Option<Duration>) -> Self {
        let points = names
            .iter()
            .map(|name| Rendezvous::new(*name, 2, timeout))
            .collect();
        Self {
            points: Arc::new(points),
        }
    }

    /// Create disabled points
    pub fn disabled(names: &[&str]) -> Self {
        let points = names.iter().map(|name| Rendezvous::disabled(*name)).collect();
        Self {
            points: Arc::new(points),
        }
    }

    /// Wait at a named point
    pub fn wait(&self, name: &str) -> Result<(), RendezvousError> {
        self.points
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| RendezvousError::Unknown(name.to_string()))?
            .wait()
    }

    /// Abandon every point
    pub fn abandon_all(&self) {
        for point in self.points.iter() {
            point.abandon();
        }
    }

    /// Point names in protocol order
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.points.iter().map(|p| p.name())
    }
}
