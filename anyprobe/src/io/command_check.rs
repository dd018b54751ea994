//! Check backed by an external command.
//!
//! Exit code 0 means satisfied, any other exit code means not satisfied.
//! Anything that prevents a clean exit (spawn failure, timeout, cancellation,
//! death by signal) is an error.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::instrument;

use crate::check::{CancelToken, Check};
use crate::io::config::ProbeConfig;
use crate::io::process::{ProbeEnd, run_probe_command};

/// Placeholder replaced by the evaluation input in every argument.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Environment variable carrying the evaluation input.
pub const INPUT_ENV: &str = "ANYPROBE_INPUT";

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STDERR_LIMIT_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct CommandCheck {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    stderr_limit_bytes: usize,
}

impl CommandCheck {
    /// `command[0]` is the program, the rest are arguments.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
        Ok(Self {
            name: name.into(),
            program,
            args: parts.collect(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            stderr_limit_bytes: DEFAULT_STDERR_LIMIT_BYTES,
        })
    }

    pub fn from_config(probe: &ProbeConfig) -> Result<Self> {
        let mut check = Self::new(probe.name.clone(), probe.command.clone())?;
        if let Some(ms) = probe.timeout_ms {
            check.timeout = Duration::from_millis(ms);
        }
        Ok(check)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_for(&self, input: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.args
                .iter()
                .map(|arg| arg.replace(INPUT_PLACEHOLDER, input)),
        )
        .env(INPUT_ENV, input);
        cmd
    }
}

impl Check<str> for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(probe = %self.name))]
    fn check(&self, input: &str, cancel: &CancelToken) -> Result<bool> {
        let output = run_probe_command(
            self.command_for(input),
            self.timeout,
            cancel,
            self.stderr_limit_bytes,
        )?;

        match output.end {
            ProbeEnd::Exited(status) => match status.code() {
                Some(0) => Ok(true),
                Some(_) => Ok(false),
                None => match output.stderr_tail() {
                    Some(tail) => bail!("{} terminated by signal: {tail}", self.program),
                    None => bail!("{} terminated by signal", self.program),
                },
            },
            ProbeEnd::TimedOut => bail!("timed out after {}ms", self.timeout.as_millis()),
            ProbeEnd::Cancelled => bail!("cancelled"),
        }
    }
}
