//! txnlab: reproduce transaction concurrency anomalies and detect them
//!
//! txnlab runs two transactions against an in-process MVCC store under a
//! deterministic interleaving, records every operation into a totally
//! ordered trace, and classifies the anomalies visible in that trace.
//!
//! # Quick Start
//!
//! ```ignore
//! use txnlab::{ScenarioKind, TxnLab};
//!
//! let lab = TxnLab::in_memory()?;
//! let run = lab.simulate_default(ScenarioKind::LostUpdate)?;
//! for anomaly in lab.detect(&run) {
//!     println!("{}: {}", anomaly.anomaly_type, anomaly.description);
//! }
//! ```
//!
//! # Architecture
//!
//! - `txnlab-core`: shared vocabulary (runs, events, anomalies, errors)
//! - `txnlab-concurrency`: row lock manager and rendezvous barriers
//! - `txnlab-storage`: the MVCC store
//! - `txnlab-engine`: trace collector and simulator
//! - `txnlab-detector`: anomaly rules
//!
//! Simulation and detection only meet at [`Run`]: the detector never sees
//! the store, and the simulator never looks at findings.

#![warn(missing_docs)]

use std::path::Path;

use tracing::info;

pub use txnlab_core::{
    notes, Anomaly, AnomalyType, Error, EventDraft, EventKind, Interleaving, IsolationLevel,
    RangePredicate, RecordKey, Result, Run, RunId, RunMeta, ScenarioKind, Severity, Store,
    StoreError, StoreSession, SumInvariant, TraceEvent, TransactionRun, TxnName, TxnParams,
    TxnStatus,
};
pub use txnlab_detector::{detect, AnomalyRule, DetectionReport, Detector, RuleError};
pub use txnlab_engine::{EngineConfig, Simulator, TraceCollector, CONFIG_FILE_NAME};
pub use txnlab_storage::MemoryStore;

/// A simulator and a detector bundled behind one handle
pub struct TxnLab<S: Store = MemoryStore> {
    simulator: Simulator<S>,
    detector: Detector,
}

impl TxnLab<MemoryStore> {
    /// Lab over a fresh in-memory store with the default configuration
    pub fn in_memory() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Lab over a fresh in-memory store
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        Ok(Self::from_simulator(Simulator::in_memory(config)?))
    }

    /// Lab configured from a `txnlab.toml` file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Self::with_config(EngineConfig::from_file(path)?)
    }
}

impl<S: Store> TxnLab<S> {
    /// Wrap an existing simulator
    pub fn from_simulator(simulator: Simulator<S>) -> Self {
        Self {
            simulator,
            detector: Detector::new(),
        }
    }

    /// Replace the detector
    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detector = detector;
        self
    }

    /// Underlying simulator
    pub fn simulator(&self) -> &Simulator<S> {
        &self.simulator
    }

    /// Execute a variant concurrently
    pub fn simulate(&self, variant: ScenarioKind, t1: TxnParams, t2: TxnParams) -> Result<Run> {
        self.simulator.run(variant, t1, t2)
    }

    /// Execute a variant with its default parameters
    pub fn simulate_default(&self, variant: ScenarioKind) -> Result<Run> {
        self.simulator.run_default(variant)
    }

    /// Execute a variant with an explicit interleaving
    pub fn simulate_with(
        &self,
        variant: ScenarioKind,
        t1: TxnParams,
        t2: TxnParams,
        interleaving: Interleaving,
    ) -> Result<Run> {
        self.simulator.run_with(variant, t1, t2, interleaving)
    }

    /// Findings for a finalized run
    pub fn detect(&self, run: &Run) -> Vec<Anomaly> {
        self.detector.detect(run)
    }

    /// Findings plus rule failures for a finalized run
    pub fn analyze(&self, run: &Run) -> DetectionReport {
        self.detector.analyze(run)
    }

    /// Simulate with default parameters and detect in one step
    pub fn reproduce(&self, variant: ScenarioKind) -> Result<(Run, Vec<Anomaly>)> {
        let run = self.simulate_default(variant)?;
        let anomalies = self.detect(&run);
        info!(
            target: "txnlab::sim",
            run = %run.id(),
            variant = %variant,
            found = anomalies.len(),
            "reproduced"
        );
        Ok((run, anomalies))
    }
}
