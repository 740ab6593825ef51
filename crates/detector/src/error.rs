//! Rule evaluation errors

use serde::Serialize;
use thiserror::Error;
use txnlab_core::{AnomalyType, Error};

/// Why a rule could not reach a verdict
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleError {
    /// The run lacks data the rule depends on
    #[error("{rule} needs {what}")]
    MissingData {
        /// Rule that gave up
        rule: AnomalyType,
        /// What was missing
        what: String,
    },

    /// The trace contradicts itself
    #[error("{rule} found an inconsistent trace: {reason}")]
    Inconsistent {
        /// Rule that gave up
        rule: AnomalyType,
        /// What contradicts
        reason: String,
    },

    /// The rule panicked
    #[error("{rule} panicked: {message}")]
    Panicked {
        /// Rule that panicked
        rule: AnomalyType,
        /// Panic payload, if it was a string
        message: String,
    },
}

impl RuleError {
    /// Rule that failed
    pub fn rule(&self) -> AnomalyType {
        match self {
            RuleError::MissingData { rule, .. }
            | RuleError::Inconsistent { rule, .. }
            | RuleError::Panicked { rule, .. } => *rule,
        }
    }
}

impl From<RuleError> for Error {
    fn from(e: RuleError) -> Self {
        Error::RuleEvaluation {
            rule: e.rule().to_string(),
            reason: e.to_string(),
        }
    }
}
