//! Check abstraction.
//!
//! The [`Check`] trait decouples evaluation from whatever a check actually
//! does (a network dial, a query, a child process). Evaluators only ever see
//! `Check` objects collected in a [`CheckSet`].

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::core::types::{CheckRef, Outcome};

/// Advisory cancellation signal shared by every check of one run.
///
/// Raising it never interrupts a check; a check may poll it and give up early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A boolean-valued, possibly blocking operation over a shared input.
///
/// Implementations must be callable from any thread, any number of times, and
/// keep no mutable state of their own that affects the answer.
pub trait Check<I: ?Sized>: Send + Sync {
    /// Human-readable name used to report which check matched.
    fn name(&self) -> &str;

    /// Evaluate the check. `cancel` is advisory and may be ignored.
    fn check(&self, input: &I, cancel: &CancelToken) -> Result<bool>;
}

/// Check backed by a closure.
pub struct FnCheck<F> {
    name: String,
    f: F,
}

impl<F> FnCheck<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<I, F> Check<I> for FnCheck<F>
where
    I: ?Sized,
    F: Fn(&I) -> Result<bool> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, input: &I, _cancel: &CancelToken) -> Result<bool> {
        (self.f)(input)
    }
}

/// Ordered set of checks evaluated against one input.
///
/// Cloning is cheap: checks are shared, never copied.
pub struct CheckSet<I: ?Sized> {
    checks: Vec<Arc<dyn Check<I>>>,
}

impl<I: ?Sized> Clone for CheckSet<I> {
    fn clone(&self) -> Self {
        Self {
            checks: self.checks.clone(),
        }
    }
}

impl<I: ?Sized> Default for CheckSet<I> {
    fn default() -> Self {
        Self { checks: Vec::new() }
    }
}

impl<I: ?Sized> fmt::Debug for CheckSet<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.checks.iter().map(|c| c.name()))
            .finish()
    }
}

impl<I: ?Sized> CheckSet<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<C: Check<I> + 'static>(&mut self, check: C) {
        self.checks.push(Arc::new(check));
    }

    /// Builder form of [`CheckSet::push`].
    pub fn with<C: Check<I> + 'static>(mut self, check: C) -> Self {
        self.push(check);
        self
    }

    pub fn push_shared(&mut self, check: Arc<dyn Check<I>>) {
        self.checks.push(check);
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Identity of the check at `index`, if present.
    pub fn check_ref(&self, index: usize) -> Option<CheckRef> {
        self.checks
            .get(index)
            .map(|c| CheckRef::new(index, c.name()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (CheckRef, &Arc<dyn Check<I>>)> {
        self.checks
            .iter()
            .enumerate()
            .map(|(index, check)| (CheckRef::new(index, check.name()), check))
    }
}

impl<I: ?Sized> FromIterator<Arc<dyn Check<I>>> for CheckSet<I> {
    fn from_iter<T: IntoIterator<Item = Arc<dyn Check<I>>>>(iter: T) -> Self {
        Self {
            checks: iter.into_iter().collect(),
        }
    }
}

/// Invoke a check, turning errors and panics into [`Outcome::Failed`].
pub(crate) fn invoke<I: ?Sized>(check: &dyn Check<I>, input: &I, cancel: &CancelToken) -> Outcome {
    match catch_unwind(AssertUnwindSafe(|| check.check(input, cancel))) {
        Ok(result) => Outcome::from_result(result),
        Err(payload) => Outcome::Failed {
            message: format!("panicked: {}", panic_message(payload.as_ref())),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
