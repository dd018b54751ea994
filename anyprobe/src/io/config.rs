//! Probe file (`anyprobe.toml`): evaluator settings plus the probe list.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::check::CheckSet;
use crate::evaluator::EvaluatorConfig;
use crate::io::command_check::CommandCheck;

pub const DEFAULT_PROBE_FILE: &str = "anyprobe.toml";

/// Probe file (TOML).
///
/// Meant to be edited by humans. The `[evaluator]` table may be omitted; the
/// probe list may not.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProbeFile {
    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default, rename = "probe")]
    pub probes: Vec<ProbeConfig>,
}

/// One `[[probe]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    pub name: String,

    /// Program and arguments. `{input}` is replaced by the evaluation input.
    pub command: Vec<String>,

    /// Per-probe timeout; the probe counts as failed when it is exceeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ProbeFile {
    /// Starter file written by `anyprobe init`.
    pub fn sample() -> Self {
        Self {
            evaluator: EvaluatorConfig::default(),
            probes: vec![
                ProbeConfig {
                    name: "resolves".to_string(),
                    command: vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        "getent hosts {input}".to_string(),
                    ],
                    timeout_ms: Some(2_000),
                },
                ProbeConfig {
                    name: "pings".to_string(),
                    command: vec![
                        "ping".to_string(),
                        "-c".to_string(),
                        "1".to_string(),
                        "{input}".to_string(),
                    ],
                    timeout_ms: Some(5_000),
                },
            ],
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.evaluator.validate().context("invalid [evaluator]")?;
        if self.probes.is_empty() {
            return Err(anyhow!("at least one [[probe]] is required"));
        }
        let mut seen = HashSet::new();
        for probe in &self.probes {
            if probe.name.trim().is_empty() {
                return Err(anyhow!("probe name must be non-empty"));
            }
            if !seen.insert(probe.name.as_str()) {
                return Err(anyhow!("duplicate probe name {:?}", probe.name));
            }
            if probe.command.is_empty() || probe.command[0].trim().is_empty() {
                return Err(anyhow!(
                    "probe {:?}: command must be a non-empty array",
                    probe.name
                ));
            }
            if probe.timeout_ms == Some(0) {
                return Err(anyhow!("probe {:?}: timeout_ms must be > 0", probe.name));
            }
        }
        Ok(())
    }

    /// Build the check set in file order.
    pub fn check_set(&self) -> Result<CheckSet<str>> {
        let mut checks = CheckSet::new();
        for probe in &self.probes {
            checks.push(
                CommandCheck::from_config(probe)
                    .with_context(|| format!("probe {:?}", probe.name))?,
            );
        }
        Ok(checks)
    }
}

/// Load and validate a probe file. Unlike most settings files a missing file
/// is an error: the file is the check set.
pub fn load_probe_file(path: &Path) -> Result<ProbeFile> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: ProbeFile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    file.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(file)
}

/// Atomically write a probe file to disk (temp file + rename).
pub fn write_probe_file(path: &Path, file: &ProbeFile) -> Result<()> {
    file.validate()?;
    let mut buf = toml::to_string_pretty(file).context("serialize probe file toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp probe file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace probe file {}", path.display()))?;
    Ok(())
}
