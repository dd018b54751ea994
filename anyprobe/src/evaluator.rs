//! Strategy selection: one entry point over both evaluators.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::aggregator::Aggregator;
use crate::check::CheckSet;
use crate::core::tally::Tally;
use crate::core::types::{BackgroundPolicy, EvaluationResult, Outcome, Strategy};
use crate::scheduler::Scheduler;
use crate::sequential::evaluate_sequential;

/// Evaluation settings.
///
/// Missing fields default to a concurrent run sized to the check set, with no
/// deadline and advisory cancellation of leftover work.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluatorConfig {
    pub strategy: Strategy,

    /// Upper bound on concurrently running checks. Unset means one worker per
    /// check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Overall deadline for the concurrent strategy, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    pub background: BackgroundPolicy,
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == Some(0) {
            return Err(anyhow!("max_workers must be > 0"));
        }
        if self.timeout_ms == Some(0) {
            return Err(anyhow!("timeout_ms must be > 0"));
        }
        if self.strategy == Strategy::Sequential && self.timeout_ms.is_some() {
            warn!("timeout_ms only applies to the concurrent strategy");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Validated configuration bound to an evaluation entry point.
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    /// Reject invalid configuration up front so evaluation itself never fails.
    pub fn new(config: EvaluatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate `checks` against `input` with the configured strategy.
    pub fn evaluate<I>(&self, checks: &CheckSet<I>, input: Arc<I>) -> EvaluationResult
    where
        I: ?Sized + Send + Sync + 'static,
    {
        match self.config.strategy {
            Strategy::Sequential => evaluate_sequential(checks, &*input),
            Strategy::Concurrent => self.evaluate_concurrent(checks, input).0,
        }
    }

    /// Run `checks` on a fresh worker pool and wait for the first match.
    ///
    /// The scheduler is returned alongside the result so callers can wait for
    /// background work with [`Scheduler::join`]; dropping it leaves that work
    /// running detached.
    #[instrument(skip_all, fields(checks = checks.len()))]
    pub fn evaluate_concurrent<I>(
        &self,
        checks: &CheckSet<I>,
        input: Arc<I>,
    ) -> (EvaluationResult, Scheduler)
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let mut scheduler = Scheduler::new(
            self.config.max_workers.and_then(NonZeroUsize::new),
            self.config.background,
        );
        let aggregator = match self.config.timeout() {
            Some(timeout) => Aggregator::with_timeout(timeout),
            None => Aggregator::new(),
        };

        match scheduler.submit_all(checks, input) {
            Ok(tasks) => (aggregator.await_first_match(tasks), scheduler),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not start worker pool");
                (every_check_failed(checks, &err), scheduler)
            }
        }
    }
}

/// No check could run at all; report one failure per check.
fn every_check_failed<I: ?Sized>(checks: &CheckSet<I>, err: &anyhow::Error) -> EvaluationResult {
    let mut tally = Tally::new();
    for (check_ref, _) in checks.iter() {
        tally.observe(
            check_ref,
            Outcome::Failed {
                message: format!("{err:#}"),
            },
        );
    }
    tally.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::FnCheck;
    use crate::core::types::CheckRef;

    #[test]
    fn default_config_is_valid() {
        let cfg = EvaluatorConfig::default();
        cfg.validate().expect("valid");
        assert_eq!(cfg.strategy, Strategy::Concurrent);
        assert_eq!(cfg.background, BackgroundPolicy::Cancel);
        assert_eq!(cfg.timeout(), None);
    }

    #[test]
    fn zero_workers_is_rejected_at_setup() {
        let err = Evaluator::new(EvaluatorConfig {
            max_workers: Some(0),
            ..EvaluatorConfig::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn zero_timeout_is_rejected_at_setup() {
        let err = Evaluator::new(EvaluatorConfig {
            timeout_ms: Some(0),
            ..EvaluatorConfig::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn both_strategies_agree_on_a_single_true_check() {
        let checks: CheckSet<str> = CheckSet::new()
            .with(FnCheck::new("no", |_: &str| -> Result<bool> { Ok(false) }))
            .with(FnCheck::new("yes", |s: &str| -> Result<bool> { Ok(s == "db") }));

        for strategy in [Strategy::Sequential, Strategy::Concurrent] {
            let evaluator = Evaluator::new(EvaluatorConfig {
                strategy,
                ..EvaluatorConfig::default()
            })
            .expect("evaluator");
            let result = evaluator.evaluate(&checks, Arc::from("db"));
            assert_eq!(result.matched, Some(CheckRef::new(1, "yes")), "{strategy}");
        }
    }

    #[test]
    fn config_parses_from_toml() {
        let cfg: EvaluatorConfig = toml::from_str(
            r#"
strategy = "sequential"
max_workers = 2
background = "drain"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.strategy, Strategy::Sequential);
        assert_eq!(cfg.max_workers, Some(2));
        assert_eq!(cfg.background, BackgroundPolicy::Drain);
        assert_eq!(cfg.timeout_ms, None);
    }
}
