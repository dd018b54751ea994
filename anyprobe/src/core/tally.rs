//! Short-circuit bookkeeping shared by both strategies.
//!
//! A [`Tally`] is fed one observed outcome at a time, in whatever order the
//! caller observes them, and says whether to keep going. It never reports
//! more than one match.

use std::time::Duration;

use crate::core::types::{CheckRef, EvaluationResult, Failure, FailureKind, Outcome};

/// What the observer should do after recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop,
}

#[derive(Debug, Default)]
pub struct Tally {
    matched: Option<CheckRef>,
    failures: Vec<Failure>,
    rejected: usize,
    observed: usize,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome. Once a match is recorded every later call is
    /// ignored and answers [`Decision::Stop`].
    pub fn observe(&mut self, check: CheckRef, outcome: Outcome) -> Decision {
        if self.matched.is_some() {
            return Decision::Stop;
        }
        self.observed += 1;
        match outcome {
            Outcome::Satisfied => {
                self.matched = Some(check);
                Decision::Stop
            }
            Outcome::Unsatisfied => {
                self.rejected += 1;
                Decision::Continue
            }
            Outcome::Failed { message } => {
                self.failures.push(Failure {
                    check: Some(check),
                    kind: FailureKind::CheckFailed { message },
                });
                Decision::Continue
            }
        }
    }

    /// Record that the deadline expired with `unobserved` checks outstanding.
    pub fn record_timeout(&mut self, timeout: Duration, unobserved: usize) {
        self.failures.push(Failure {
            check: None,
            kind: FailureKind::EvaluationTimeout {
                timeout_ms: timeout.as_millis() as u64,
                unobserved,
            },
        });
    }

    pub fn observed(&self) -> usize {
        self.observed
    }

    pub fn is_matched(&self) -> bool {
        self.matched.is_some()
    }

    pub fn finish(self) -> EvaluationResult {
        EvaluationResult {
            satisfied: self.matched.is_some(),
            matched: self.matched,
            failures: self.failures,
            rejected: self.rejected,
        }
    }
}
