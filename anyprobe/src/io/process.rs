//! Child processes with a deadline, advisory cancellation and bounded stderr.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::check::CancelToken;

/// How often a waiting probe looks at its cancellation token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Why the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEnd {
    Exited(ExitStatus),
    /// Killed after exceeding its own timeout.
    TimedOut,
    /// Killed because the run no longer needs its answer.
    Cancelled,
}

/// Captured result of one probe command.
#[derive(Debug)]
pub struct ProbeOutput {
    pub end: ProbeEnd,
    pub stderr: Vec<u8>,
    pub stderr_truncated: usize,
}

impl ProbeOutput {
    /// Last line of stderr, trimmed, for error messages.
    pub fn stderr_tail(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.stderr);
        text.lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

/// Run `cmd` until it exits, `timeout` elapses, or `cancel` is raised.
///
/// Stdout is discarded. Stderr is read concurrently so the child can never
/// block on a full pipe; at most `stderr_limit_bytes` are kept.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, stderr_limit_bytes = stderr_limit_bytes))]
pub fn run_probe_command(
    mut cmd: Command,
    timeout: Duration,
    cancel: &CancelToken,
    stderr_limit_bytes: usize,
) -> Result<ProbeOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    debug!("spawning probe process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn probe");
            return Err(e).context("spawn probe command");
        }
    };

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, stderr_limit_bytes));

    let deadline = Instant::now() + timeout;
    let end = loop {
        if cancel.is_cancelled() {
            debug!("probe cancelled, killing");
            kill_and_reap(&mut child)?;
            break ProbeEnd::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(timeout_ms = timeout.as_millis() as u64, "probe timed out, killing");
            kill_and_reap(&mut child)?;
            break ProbeEnd::TimedOut;
        }
        let slice = CANCEL_POLL_INTERVAL.min(deadline - now);
        if let Some(status) = child.wait_timeout(slice).context("wait for probe")? {
            break ProbeEnd::Exited(status);
        }
    };

    // A killed child may leave grandchildren holding the pipe open; only wait
    // for stderr when the child exited on its own.
    let (stderr, stderr_truncated) = match end {
        ProbeEnd::Exited(_) => match stderr_handle.join() {
            Ok(result) => result.context("read probe stderr")?,
            Err(_) => return Err(anyhow!("stderr reader thread panicked")),
        },
        ProbeEnd::TimedOut | ProbeEnd::Cancelled => (Vec::new(), 0),
    };
    if stderr_truncated > 0 {
        debug!(stderr_truncated, "probe stderr truncated");
    }

    debug!(end = ?end, "probe finished");
    Ok(ProbeOutput {
        end,
        stderr,
        stderr_truncated,
    })
}

fn kill_and_reap(child: &mut Child) -> Result<()> {
    child.kill().context("kill probe")?;
    child.wait().context("wait probe after kill")?;
    Ok(())
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
