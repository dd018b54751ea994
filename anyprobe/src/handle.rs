//! Lifecycle of one concurrent check invocation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::types::{CheckRef, Outcome};

/// State of a [`TaskHandle`].
///
/// `Pending -> Running -> {Completed | Failed | Discarded}`. `Discarded` may
/// also be entered straight from `Pending` when a queued check is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed(bool),
    Failed(String),
    Discarded,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed(_) | TaskState::Failed(_) | TaskState::Discarded
        )
    }
}

/// Handle to one submitted check.
///
/// Workers drive the transitions up to a natural terminal state; the
/// aggregator discards whatever it stopped waiting for. The first terminal
/// transition wins, later ones are refused.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    check: CheckRef,
    state: Arc<Mutex<TaskState>>,
}

impl TaskHandle {
    pub(crate) fn new(check: CheckRef) -> Self {
        Self {
            check,
            state: Arc::new(Mutex::new(TaskState::Pending)),
        }
    }

    pub fn check(&self) -> &CheckRef {
        &self.check
    }

    pub fn state(&self) -> TaskState {
        self.lock().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.lock().is_terminal()
    }

    /// `Pending -> Running`. Returns false if the handle was discarded first.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.lock();
        match *state {
            TaskState::Pending => {
                *state = TaskState::Running;
                true
            }
            _ => false,
        }
    }

    /// `Running -> Completed | Failed`. Returns false if already terminal.
    pub(crate) fn settle(&self, outcome: &Outcome) -> bool {
        let mut state = self.lock();
        if state.is_terminal() {
            return false;
        }
        *state = match outcome {
            Outcome::Satisfied => TaskState::Completed(true),
            Outcome::Unsatisfied => TaskState::Completed(false),
            Outcome::Failed { message } => TaskState::Failed(message.clone()),
        };
        true
    }

    /// Any non-terminal state `-> Discarded`. Returns false if already terminal.
    pub(crate) fn discard(&self) -> bool {
        let mut state = self.lock();
        if state.is_terminal() {
            return false;
        }
        *state = TaskState::Discarded;
        true
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
