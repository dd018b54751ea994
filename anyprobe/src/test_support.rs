//! Test-only checks with scripted timing and outcomes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use crate::check::{CancelToken, Check};

/// Granularity at which a cancellation-aware scripted check polls its token.
const POLL: Duration = Duration::from_millis(5);

/// What a scripted check does once its delay has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    Value(bool),
    Error(String),
    Panic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
    /// Gave up early after observing the cancellation token.
    Cancelled(String),
}

/// Shared, ordered record of what scripted checks did.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of checks that started, in start order.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Started(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Names of checks that ran to completion, in completion order.
    pub fn finished(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Finished(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Cancelled(name) => Some(name),
                _ => None,
            })
            .collect()
    }
}

/// A check that sleeps for `delay` and then follows its script.
#[derive(Debug, Clone)]
pub struct ScriptedCheck {
    name: String,
    delay: Duration,
    script: Script,
    honor_cancel: bool,
    journal: Option<Journal>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedCheck {
    pub fn new(name: &str, delay: Duration, script: Script) -> Self {
        Self {
            name: name.to_string(),
            delay,
            script,
            honor_cancel: false,
            journal: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns `value` after `delay`.
    pub fn value(name: &str, delay: Duration, value: bool) -> Self {
        Self::new(name, delay, Script::Value(value))
    }

    /// Fails with `message` after `delay`.
    pub fn error(name: &str, delay: Duration, message: &str) -> Self {
        Self::new(name, delay, Script::Error(message.to_string()))
    }

    /// Panics with `message` after `delay`.
    pub fn panic(name: &str, delay: Duration, message: &str) -> Self {
        Self::new(name, delay, Script::Panic(message.to_string()))
    }

    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    /// Poll the cancellation token while sleeping and give up once raised.
    pub fn honor_cancel(mut self) -> Self {
        self.honor_cancel = true;
        self
    }

    /// Counter shared by every clone of this check.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn record(&self, event: Event) {
        if let Some(journal) = &self.journal {
            journal.record(event);
        }
    }

    /// Sleep for the scripted delay. Returns false if cancelled first.
    fn wait(&self, cancel: &CancelToken) -> bool {
        if !self.honor_cancel {
            thread::sleep(self.delay);
            return true;
        }
        let deadline = Instant::now() + self.delay;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(POLL.min(deadline - now));
        }
    }
}

impl<I: ?Sized> Check<I> for ScriptedCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, _input: &I, cancel: &CancelToken) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.record(Event::Started(self.name.clone()));
        if !self.wait(cancel) {
            self.record(Event::Cancelled(self.name.clone()));
            bail!("{} cancelled", self.name);
        }
        self.record(Event::Finished(self.name.clone()));
        match &self.script {
            Script::Value(value) => Ok(*value),
            Script::Error(message) => bail!("{message}"),
            Script::Panic(message) => panic!("{message}"),
        }
    }
}

/// `n` scripting units of wall-clock time.
pub fn units(n: u32) -> Duration {
    UNIT * n
}

/// Scenario time unit; large enough to dominate thread start-up jitter.
pub const UNIT: Duration = Duration::from_millis(50);
