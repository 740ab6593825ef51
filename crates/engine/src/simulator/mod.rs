//! Scenario simulator
//!
//! Executes one variant as two concurrent transaction contexts against a
//! shared store and hands back the finished, frozen run.
//!
//! # Run lifecycle
//!
//! 1. Validate parameters (no store contact on failure)
//! 2. Reset the store to the configured seed rows
//! 3. Open both sessions and a collector run
//! 4. Execute T1 and T2, in parallel or back to back
//! 5. Record `final_state` markers and finalize
//!
//! Runs on one simulator are serialized: they share a store, and a reset
//! must not land in the middle of another run.

mod context;
mod params;
mod protocols;

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use txnlab_concurrency::RendezvousSet;
use txnlab_core::{
    Error, EventDraft, Interleaving, Result, Run, RunId, RunMeta, ScenarioKind, Store, StoreError,
    StoreSession, TxnName, TxnParams,
};
use txnlab_storage::MemoryStore;

use crate::collector::TraceCollector;
use crate::config::EngineConfig;
use context::TxnContext;
use params::Plan;

/// Drives scenario variants against a store
pub struct Simulator<S: Store = MemoryStore> {
    store: S,
    config: EngineConfig,
    collector: Arc<TraceCollector>,
    run_lock: Mutex<()>,
}

impl Simulator<MemoryStore> {
    /// Simulator over a fresh in-memory store
    ///
    /// # Errors
    ///
    /// `Config` if the configuration does not validate.
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        let store = MemoryStore::with_lock_timeout(config.lock_timeout());
        Self::new(store, config)
    }
}

impl<S: Store> Simulator<S> {
    /// Simulator over an existing store
    ///
    /// # Errors
    ///
    /// `Config` if the configuration does not validate.
    pub fn new(store: S, config: EngineConfig) -> Result<Self> {
        Self::with_collector(store, config, Arc::new(TraceCollector::new()))
    }

    /// Simulator sharing a collector with other simulators
    pub fn with_collector(
        store: S,
        config: EngineConfig,
        collector: Arc<TraceCollector>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            collector,
            run_lock: Mutex::new(()),
        })
    }

    /// The store runs execute against
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The collector recording runs
    pub fn collector(&self) -> &Arc<TraceCollector> {
        &self.collector
    }

    /// Run a variant with its default parameters
    pub fn run_default(&self, kind: ScenarioKind) -> Result<Run> {
        let (t1, t2) = kind.default_params();
        self.run(kind, t1, t2)
    }

    /// Run a variant concurrently
    ///
    /// # Errors
    ///
    /// - `InvalidParameters` before any store interaction
    /// - `StoreUnavailable` if the store refuses a session
    /// - `StoreConflict` for an unexpected conflict (or two deadlock victims)
    ///
    /// A failed run is discarded; the collector keeps nothing of it.
    pub fn run(&self, kind: ScenarioKind, t1: TxnParams, t2: TxnParams) -> Result<Run> {
        self.run_with(kind, t1, t2, Interleaving::Concurrent)
    }

    /// Run a variant with an explicit interleaving
    pub fn run_with(
        &self,
        kind: ScenarioKind,
        t1: TxnParams,
        t2: TxnParams,
        interleaving: Interleaving,
    ) -> Result<Run> {
        let plan = params::validate(kind, t1, t2, &self.config)?;
        let _serial = self.run_lock.lock();

        self.reset_store()?;
        let session1 = self
            .store
            .connect()
            .map_err(|e| Error::from_store(TxnName::T1, "connect", e))?;
        let session2 = self
            .store
            .connect()
            .map_err(|e| Error::from_store(TxnName::T2, "connect", e))?;

        let mut meta = RunMeta::new(kind, interleaving);
        if let Some(invariant) = &plan.invariant {
            meta = meta.with_invariant(invariant.clone());
        }
        let run_id = self.collector.begin_run(meta);
        info!(target: "txnlab::sim", run_id = %run_id, variant = %kind, ?interleaving, "run started");

        let names = protocols::points(kind);
        let points = match interleaving {
            Interleaving::Concurrent => RendezvousSet::new(names, self.config.rendezvous_timeout()),
            Interleaving::Sequential => RendezvousSet::disabled(names),
        };
        let isolation = kind.isolation_level();
        let mut ctx1 = TxnContext::new(TxnName::T1, isolation, session1, &self.collector, run_id, points.clone());
        let mut ctx2 = TxnContext::new(TxnName::T2, isolation, session2, &self.collector, run_id, points);

        let outcomes = match interleaving {
            Interleaving::Concurrent => thread::scope(|scope| {
                let h1 = scope.spawn(|| drive(&mut ctx1, &plan));
                let h2 = scope.spawn(|| drive(&mut ctx2, &plan));
                [join(h1, TxnName::T1), join(h2, TxnName::T2)]
            }),
            Interleaving::Sequential => {
                let first = drive(&mut ctx1, &plan);
                let second = match &first {
                    Ok(()) => drive(&mut ctx2, &plan),
                    Err(_) => Err(Error::Interrupted {
                        transaction: TxnName::T2,
                        point: "start".to_string(),
                    }),
                };
                [first, second]
            }
        };
        drop(ctx1);
        drop(ctx2);

        if let Err(e) = settle(kind, outcomes) {
            warn!(target: "txnlab::sim", run_id = %run_id, error = %e, "run failed");
            self.collector.discard(run_id);
            return Err(e);
        }
        self.finish(run_id, &plan)
    }

    fn reset_store(&self) -> Result<()> {
        let seed = self.config.seed_rows()?;
        self.store.reset(&seed).map_err(|e| match e {
            StoreError::Unavailable(msg) => Error::StoreUnavailable(msg),
            other => Error::invalid_state(format!("store reset failed: {}", other)),
        })
    }

    /// Record the committed value of every touched key, then freeze
    fn finish(&self, run_id: RunId, plan: &Plan) -> Result<Run> {
        let recorded = plan.touched_keys().into_iter().try_for_each(|key| {
            let value = self.store.committed_value(&key).map_err(|e| match e {
                StoreError::Unavailable(msg) => Error::StoreUnavailable(msg),
                other => Error::invalid_state(format!("final state of {}: {}", key, other)),
            })?;
            self.collector
                .record(run_id, EventDraft::final_state(key, value))
                .map(|_| ())
        });
        if let Err(e) = recorded {
            self.collector.discard(run_id);
            return Err(e);
        }
        let run = self.collector.finalize(run_id)?;
        info!(
            target: "txnlab::sim",
            run_id = %run_id,
            events = run.len(),
            t1 = %run.transaction(TxnName::T1).status,
            t2 = %run.transaction(TxnName::T2).status,
            "run finished"
        );
        Ok(run)
    }
}

/// Run one context's script, cleaning up after a failure
///
/// A panicking script counts as a failure so the counterpart is released.
fn drive<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    let txn = ctx.name();
    let result = panic::catch_unwind(AssertUnwindSafe(|| protocols::execute(ctx, plan)))
        .unwrap_or_else(|_| Err(Error::invalid_state(format!("{} context panicked", txn))));
    if let Err(e) = &result {
        debug!(target: "txnlab::sim", txn = %ctx.name(), error = %e, "context stopped");
        ctx.abort_open();
    }
    result
}

fn join(handle: thread::ScopedJoinHandle<'_, Result<()>>, txn: TxnName) -> Result<()> {
    handle
        .join()
        .unwrap_or_else(|_| Err(Error::invalid_state(format!("{} context panicked", txn))))
}

/// Decide whether a run succeeded from the two context outcomes
///
/// A deadlock victim is the expected outcome of exactly one deadlock
/// context. Interruptions only ever follow a counterpart failure, so the
/// root cause is the first error that is not one.
fn settle(kind: ScenarioKind, outcomes: [Result<()>; 2]) -> Result<()> {
    let [first, second] = outcomes;
    let mut failures = Vec::new();
    let mut victims = Vec::new();
    for outcome in [first, second] {
        match outcome {
            Ok(()) => {}
            Err(Error::DeadlockVictim {
                transaction,
                source,
            }) if kind == ScenarioKind::Deadlock => victims.push((transaction, source)),
            Err(e) => failures.push(e),
        }
    }

    if let Some(root) = failures.iter().position(|e| !e.is_interruption()) {
        return Err(failures.swap_remove(root));
    }
    if let Some(interrupted) = failures.pop() {
        return Err(interrupted);
    }
    if victims.len() > 1 {
        let (transaction, source) = victims.swap_remove(0);
        return Err(Error::StoreConflict {
            transaction,
            operation: "second lock".to_string(),
            source,
        });
    }
    Ok(())
}
