//! Isolated rule evaluation
//!
//! The detector builds one `TraceIndex` per run and hands it to each rule in
//! turn. A rule that errors or panics is recorded in the report and the
//! remaining rules still run.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tracing::{debug, warn};
use txnlab_core::{Anomaly, Run};

use crate::error::RuleError;
use crate::index::TraceIndex;
use crate::rules::AnomalyRule;

/// Outcome of evaluating every rule over one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionReport {
    /// Findings, in rule order
    pub anomalies: Vec<Anomaly>,
    /// Rules that could not reach a verdict
    pub failures: Vec<RuleError>,
}

impl DetectionReport {
    /// Whether every rule reached a verdict
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether nothing was found
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Runs a fixed list of rules over finalized runs
#[derive(Debug, Clone)]
pub struct Detector {
    rules: Vec<AnomalyRule>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    /// Detector with every rule
    pub fn new() -> Self {
        Self {
            rules: AnomalyRule::ALL.to_vec(),
        }
    }

    /// Detector with a subset of rules, evaluated in catalog order
    pub fn with_rules(rules: impl IntoIterator<Item = AnomalyRule>) -> Self {
        let mut rules: Vec<AnomalyRule> = rules.into_iter().collect();
        rules.sort_by_key(|r| AnomalyRule::ALL.iter().position(|a| a == r));
        rules.dedup();
        Self { rules }
    }

    /// Rules this detector evaluates
    pub fn rules(&self) -> &[AnomalyRule] {
        &self.rules
    }

    /// Evaluate every rule, collecting findings and failures
    pub fn analyze(&self, run: &Run) -> DetectionReport {
        let index = TraceIndex::new(run);
        let mut report = DetectionReport::default();
        for rule in &self.rules {
            match evaluate_isolated(*rule, &index) {
                Ok(Some(anomaly)) => {
                    debug!(
                        target: "txnlab::detector",
                        run = %run.id(),
                        rule = %rule,
                        severity = anomaly.severity.as_str(),
                        "anomaly found"
                    );
                    report.anomalies.push(anomaly);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(target: "txnlab::detector", run = %run.id(), rule = %rule, error = %e, "rule failed");
                    report.failures.push(e);
                }
            }
        }
        report
    }

    /// Findings only; rule failures are logged and dropped
    pub fn detect(&self, run: &Run) -> Vec<Anomaly> {
        self.analyze(run).anomalies
    }
}

fn evaluate_isolated(rule: AnomalyRule, index: &TraceIndex<'_>) -> Result<Option<Anomaly>, RuleError> {
    match catch_unwind(AssertUnwindSafe(|| rule.evaluate_indexed(index))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "(non-string panic)".to_string());
            Err(RuleError::Panicked {
                rule: rule.anomaly_type(),
                message,
            })
        }
    }
}

/// Run every rule over a finalized run
pub fn detect(run: &Run) -> Vec<Anomaly> {
    Detector::new().detect(run)
}
