//! Completion-ordered aggregation with early termination.

use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, instrument, warn};

use crate::core::tally::{Decision, Tally};
use crate::core::types::{EvaluationResult, Outcome};
use crate::scheduler::TaskSet;

/// Observes a [`TaskSet`] in completion order and stops at the first `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    timeout: Option<Duration>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the whole wait by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Wait for the first check that completes with `true`.
    ///
    /// Blocks until the answer is known, every handle has been observed, or
    /// the deadline expires. Whatever is still outstanding at that point is
    /// discarded (see [`crate::BackgroundPolicy`]).
    #[instrument(skip_all, fields(tasks = tasks.len(), timeout_ms = self.timeout.map(|t| t.as_millis() as u64)))]
    pub fn await_first_match(&self, tasks: TaskSet) -> EvaluationResult {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut tally = Tally::new();
        let mut remaining = tasks.len();

        while remaining > 0 {
            let received = match deadline {
                Some(deadline) => tasks
                    .completions()
                    .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => tasks
                    .completions()
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            let completion = match received {
                Ok(completion) => completion,
                Err(RecvTimeoutError::Timeout) => {
                    let timeout = self.timeout.unwrap_or_default();
                    warn!(
                        unobserved = remaining,
                        timeout_ms = timeout.as_millis() as u64,
                        "evaluation deadline expired"
                    );
                    tally.record_timeout(timeout, remaining);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    record_unreported(&tasks, &mut tally);
                    break;
                }
            };
            remaining -= 1;

            let Some(handle) = tasks.handle(completion.index) else {
                warn!(index = completion.index, "completion for unknown task");
                continue;
            };
            let check = handle.check().clone();
            debug!(check = %check, outcome = ?completion.outcome, "observed completion");
            if tally.observe(check.clone(), completion.outcome) == Decision::Stop {
                info!(check = %check, observed = tally.observed(), "check satisfied");
                break;
            }
        }

        tasks.stop();
        tally.finish()
    }
}

/// Every worker is gone yet some handles never reported. Record each of them
/// as failed so the caller still sees one entry per check.
fn record_unreported(tasks: &TaskSet, tally: &mut Tally) {
    for handle in tasks.handles() {
        if !handle.is_terminal() {
            warn!(check = %handle.check(), "worker exited without reporting");
            tally.observe(
                handle.check().clone(),
                Outcome::Failed {
                    message: "worker exited without reporting a result".to_string(),
                },
            );
        }
    }
}
