//! Bounded worker pool that runs every check of a set concurrently.
//!
//! One [`Scheduler`] owns the threads it spawns. Workers pull queued checks in
//! submission order, run each to completion, and report on a completion
//! channel in the order they finish. Nothing here decides when to stop; that
//! is the aggregator's job.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, instrument, trace, warn};

use crate::check::{CancelToken, Check, CheckSet, invoke};
use crate::core::types::{BackgroundPolicy, Outcome};
use crate::handle::TaskHandle;

/// A finished check as delivered to the aggregator.
#[derive(Debug)]
pub(crate) struct Completion {
    pub index: usize,
    pub outcome: Outcome,
}

struct Job<I: ?Sized> {
    handle: TaskHandle,
    check: Arc<dyn Check<I>>,
}

/// Everything submitted for one run: one handle per check, in submission
/// order, plus the completion stream.
pub struct TaskSet {
    handles: Vec<TaskHandle>,
    completions: Receiver<Completion>,
    cancel: CancelToken,
    background: BackgroundPolicy,
}

impl TaskSet {
    pub fn handles(&self) -> &[TaskHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub(crate) fn handle(&self, index: usize) -> Option<&TaskHandle> {
        self.handles.get(index)
    }

    pub(crate) fn completions(&self) -> &Receiver<Completion> {
        &self.completions
    }

    /// Stop observing. Every handle that has not reached a terminal state is
    /// discarded; under [`BackgroundPolicy::Cancel`] the run's token is raised.
    /// Dropping the receiver unsubscribes from further completions.
    ///
    /// Returns the handles that were discarded.
    pub(crate) fn stop(self) -> Vec<TaskHandle> {
        if self.background == BackgroundPolicy::Cancel {
            self.cancel.cancel();
        }
        let discarded: Vec<TaskHandle> = self
            .handles
            .into_iter()
            .filter(|handle| handle.discard())
            .collect();
        if !discarded.is_empty() {
            debug!(
                discarded = discarded.len(),
                background = ?self.background,
                "stopped observing unfinished checks"
            );
        }
        discarded
    }
}

/// Owner of a bounded worker pool.
///
/// Dropping a scheduler detaches its workers: background checks keep running
/// until they finish. Use [`Scheduler::join`] to wait for them.
pub struct Scheduler {
    max_workers: Option<NonZeroUsize>,
    background: BackgroundPolicy,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// `max_workers = None` sizes the pool to the number of checks.
    pub fn new(max_workers: Option<NonZeroUsize>, background: BackgroundPolicy) -> Self {
        Self {
            max_workers,
            background,
            workers: Vec::new(),
        }
    }

    /// Number of workers a run over `checks` checks gets.
    pub fn pool_size(&self, checks: usize) -> usize {
        match self.max_workers {
            Some(max) => checks.min(max.get()),
            None => checks,
        }
    }

    /// Queue every check and start the pool.
    ///
    /// Fails only if not a single worker thread could be spawned.
    #[instrument(skip_all, fields(checks = checks.len(), workers = tracing::field::Empty))]
    pub fn submit_all<I>(&mut self, checks: &CheckSet<I>, input: Arc<I>) -> Result<TaskSet>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job<I>>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let cancel = CancelToken::new();

        let mut handles = Vec::with_capacity(checks.len());
        for (check_ref, check) in checks.iter() {
            let handle = TaskHandle::new(check_ref);
            handles.push(handle.clone());
            job_tx
                .send(Job {
                    handle,
                    check: Arc::clone(check),
                })
                .map_err(|_| anyhow!("job queue closed while submitting"))?;
        }
        drop(job_tx);

        let pool_size = self.pool_size(checks.len());
        tracing::Span::current().record("workers", pool_size);

        let mut spawned = 0usize;
        for n in 0..pool_size {
            let jobs = job_rx.clone();
            let input = Arc::clone(&input);
            let done = done_tx.clone();
            let cancel = cancel.clone();
            let result = thread::Builder::new()
                .name(format!("anyprobe-worker-{n}"))
                .spawn(move || work(jobs, input, done, cancel));
            match result {
                Ok(worker) => {
                    self.workers.push(worker);
                    spawned += 1;
                }
                Err(err) if spawned > 0 => {
                    warn!(err = %err, spawned, requested = pool_size, "worker pool smaller than requested");
                    break;
                }
                Err(err) => return Err(err).context("spawn check worker"),
            }
        }
        debug!(spawned, "worker pool started");

        Ok(TaskSet {
            handles,
            completions: done_rx,
            cancel,
            background: self.background,
        })
    }

    /// Workers of this scheduler that are still running checks.
    pub fn busy_workers(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_finished()).count()
    }

    /// Block until every worker has drained its queue.
    pub fn join(self) -> Result<()> {
        for worker in self.workers {
            worker
                .join()
                .map_err(|_| anyhow!("check worker panicked"))?;
        }
        Ok(())
    }
}

fn work<I: ?Sized>(
    jobs: Receiver<Job<I>>,
    input: Arc<I>,
    done: Sender<Completion>,
    cancel: CancelToken,
) {
    for job in &jobs {
        let check = job.handle.check().clone();
        if cancel.is_cancelled() {
            job.handle.discard();
            trace!(check = %check, "skipping queued check after cancellation");
            continue;
        }
        if !job.handle.start() {
            trace!(check = %check, "running discarded check to completion");
        }

        let outcome = invoke(job.check.as_ref(), &*input, &cancel);
        debug!(check = %check, outcome = ?outcome, "check finished");

        if !job.handle.settle(&outcome) {
            continue;
        }
        let completion = Completion {
            index: check.index,
            outcome,
        };
        if done.send(completion).is_err() {
            trace!(check = %check, "aggregator no longer observing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::FnCheck;
    use crate::handle::TaskState;

    fn set(values: &[bool]) -> CheckSet<str> {
        let mut set = CheckSet::new();
        for (i, value) in values.iter().copied().enumerate() {
            set.push(FnCheck::new(format!("c{i}"), move |_: &str| -> Result<bool> {
                Ok(value)
            }));
        }
        set
    }

    #[test]
    fn pool_size_is_bounded_by_checks_and_max_workers() {
        let unbounded = Scheduler::new(None, BackgroundPolicy::Cancel);
        assert_eq!(unbounded.pool_size(0), 0);
        assert_eq!(unbounded.pool_size(7), 7);

        let bounded = Scheduler::new(NonZeroUsize::new(3), BackgroundPolicy::Cancel);
        assert_eq!(bounded.pool_size(2), 2);
        assert_eq!(bounded.pool_size(10), 3);
    }

    #[test]
    fn every_check_gets_one_handle_and_one_completion() {
        let mut scheduler = Scheduler::new(NonZeroUsize::new(2), BackgroundPolicy::Drain);
        let tasks = scheduler
            .submit_all(&set(&[false, true, false]), Arc::from("input"))
            .expect("submit");
        assert_eq!(tasks.len(), 3);

        let mut seen: Vec<usize> = tasks.completions().iter().map(|c| c.index).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);

        let states: Vec<TaskState> = tasks.handles().iter().map(|h| h.state()).collect();
        assert_eq!(
            states,
            vec![
                TaskState::Completed(false),
                TaskState::Completed(true),
                TaskState::Completed(false)
            ]
        );
        scheduler.join().expect("join");
    }

    #[test]
    fn empty_set_spawns_no_workers() {
        let mut scheduler = Scheduler::new(None, BackgroundPolicy::Cancel);
        let tasks = scheduler
            .submit_all(&CheckSet::<str>::new(), Arc::from("input"))
            .expect("submit");
        assert!(tasks.is_empty());
        assert_eq!(scheduler.busy_workers(), 0);
        assert!(tasks.completions().recv().is_err());
    }
}
