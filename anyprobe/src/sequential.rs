//! Lazy, in-order evaluation on the calling thread.

use tracing::{debug, info, instrument};

use crate::check::{CancelToken, CheckSet, invoke};
use crate::core::tally::{Decision, Tally};
use crate::core::types::EvaluationResult;

/// Invoke checks one by one in submission order until one returns `true`.
///
/// A failing check counts as "not satisfied" and evaluation moves on. Checks
/// after the first match are never invoked.
#[instrument(skip_all, fields(checks = checks.len()))]
pub fn evaluate_sequential<I: ?Sized>(checks: &CheckSet<I>, input: &I) -> EvaluationResult {
    let cancel = CancelToken::new();
    let mut tally = Tally::new();

    for (check_ref, check) in checks.iter() {
        let outcome = invoke(check.as_ref(), input, &cancel);
        debug!(check = %check_ref, outcome = ?outcome, "check finished");
        if tally.observe(check_ref.clone(), outcome) == Decision::Stop {
            info!(check = %check_ref, invoked = tally.observed(), "check satisfied");
            break;
        }
    }

    tally.finish()
}
