//! Short-circuiting "does any check pass?" evaluation.
//!
//! A [`CheckSet`] holds independent, possibly slow boolean checks over one
//! shared input. An [`Evaluator`] answers whether any of them is satisfied,
//! either lazily in order on the calling thread or concurrently on a bounded
//! worker pool, stopping as soon as the first `true` is observed.
//!
//! - **[`core`]**: Pure, deterministic result types and aggregation rules.
//!   No threads, no I/O.
//! - **[`io`]**: Side effects (probe file, child processes).
//!
//! Orchestration modules ([`sequential`], [`scheduler`], [`aggregator`],
//! [`evaluator`]) combine the two.

pub mod aggregator;
pub mod check;
pub mod core;
pub mod evaluator;
pub mod exit_codes;
pub mod handle;
pub mod io;
pub mod logging;
pub mod scheduler;
pub mod sequential;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use check::{CancelToken, Check, CheckSet, FnCheck};
pub use crate::core::types::{
    BackgroundPolicy, CheckRef, EvaluationResult, Failure, FailureKind, Strategy,
};
pub use evaluator::{Evaluator, EvaluatorConfig};
