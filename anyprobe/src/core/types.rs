//! Shared deterministic types for evaluation results.
//!
//! These types define stable contracts between the evaluators, the aggregator
//! and callers. They carry no threads or I/O and serialize deterministically.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of one check within a check set: its position plus its name.
///
/// Names are not required to be unique, so the position is what tells two
/// checks apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckRef {
    pub index: usize,
    pub name: String,
}

impl CheckRef {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl fmt::Display for CheckRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.name)
    }
}

/// Evaluation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Invoke checks one at a time in order, stopping at the first `true`.
    Sequential,
    /// Run checks on a bounded worker pool and observe them as they finish.
    #[default]
    Concurrent,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// What happens to submitted work once the answer is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundPolicy {
    /// Raise the advisory cancellation signal and skip checks that have not
    /// started yet. Running checks finish unless they observe the signal.
    #[default]
    Cancel,
    /// Let every submitted check run to completion; results are discarded.
    Drain,
}

/// Result of one check invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Satisfied,
    Unsatisfied,
    Failed { message: String },
}

impl Outcome {
    /// Convert a check's return value, keeping the full error context chain.
    pub fn from_result(result: anyhow::Result<bool>) -> Self {
        match result {
            Ok(true) => Outcome::Satisfied,
            Ok(false) => Outcome::Unsatisfied,
            Err(err) => Outcome::Failed {
                message: format!("{err:#}"),
            },
        }
    }
}

/// Why an entry landed in [`EvaluationResult::failures`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The check returned an error (or panicked) instead of a boolean.
    #[error("check failed: {message}")]
    CheckFailed { message: String },
    /// The overall deadline expired before an answer was known.
    #[error("evaluation timed out after {timeout_ms}ms with {unobserved} check(s) unobserved")]
    EvaluationTimeout { timeout_ms: u64, unobserved: usize },
}

/// One recorded failure. Timeouts belong to the run, not a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub check: Option<CheckRef>,
    #[serde(flatten)]
    pub kind: FailureKind,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.check {
            Some(check) => write!(f, "{check}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Aggregate answer of one evaluation run.
///
/// `satisfied` is true exactly when `matched` is set. `failures` keeps the
/// order in which failures were observed. `rejected` counts checks observed
/// returning `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub satisfied: bool,
    pub matched: Option<CheckRef>,
    pub failures: Vec<Failure>,
    pub rejected: usize,
}

impl EvaluationResult {
    /// Result for a run where nothing was observed.
    pub fn unsatisfied() -> Self {
        Self {
            satisfied: false,
            matched: None,
            failures: Vec::new(),
            rejected: 0,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f.kind, FailureKind::EvaluationTimeout { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn outcome_keeps_error_context_chain() {
        let err: anyhow::Result<bool> = Err(anyhow!("connection refused")).context("dial db");
        let outcome = Outcome::from_result(err);
        assert_eq!(
            outcome,
            Outcome::Failed {
                message: "dial db: connection refused".to_string()
            }
        );
    }

    #[test]
    fn failure_serializes_with_flattened_kind() {
        let failure = Failure {
            check: None,
            kind: FailureKind::EvaluationTimeout {
                timeout_ms: 50,
                unobserved: 2,
            },
        };
        let value = serde_json::to_value(&failure).expect("serialize");
        assert_eq!(value["kind"], "evaluation_timeout");
        assert_eq!(value["unobserved"], 2);
        assert!(value["check"].is_null());
    }

    #[test]
    fn strategy_parses_lowercase() {
        let strategy: Strategy = serde_json::from_str("\"sequential\"").expect("parse");
        assert_eq!(strategy, Strategy::Sequential);
    }
}
