//! Command-line front end: evaluate the probes of a probe file against one
//! input and exit with whether any of them matched.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use anyprobe::core::types::{BackgroundPolicy, EvaluationResult, Strategy};
use anyprobe::evaluator::{Evaluator, EvaluatorConfig};
use anyprobe::exit_codes;
use anyprobe::io::config::{DEFAULT_PROBE_FILE, ProbeFile, load_probe_file, write_probe_file};
use anyprobe::logging;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "anyprobe",
    version,
    about = "Report whether any probe succeeds for an input"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every probe against INPUT and stop at the first success.
    Run(RunArgs),
    /// Load and validate the probe file.
    Validate {
        #[arg(short, long, default_value = DEFAULT_PROBE_FILE)]
        config: PathBuf,
    },
    /// Write a starter probe file.
    Init {
        #[arg(short, long, default_value = DEFAULT_PROBE_FILE)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Value handed to every probe.
    input: String,

    #[arg(short, long, default_value = DEFAULT_PROBE_FILE)]
    config: PathBuf,

    /// Override `[evaluator].strategy`.
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Override `[evaluator].max_workers`.
    #[arg(long)]
    max_workers: Option<usize>,

    /// Override `[evaluator].timeout_ms`.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Override `[evaluator].background`.
    #[arg(long, value_enum)]
    background: Option<BackgroundArg>,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Sequential,
    Concurrent,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Sequential => Strategy::Sequential,
            StrategyArg::Concurrent => Strategy::Concurrent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackgroundArg {
    Cancel,
    Drain,
}

impl From<BackgroundArg> for BackgroundPolicy {
    fn from(arg: BackgroundArg) -> Self {
        match arg {
            BackgroundArg::Cancel => BackgroundPolicy::Cancel,
            BackgroundArg::Drain => BackgroundPolicy::Drain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Validate { config } => cmd_validate(&config),
        Command::Init { config, force } => cmd_init(&config, force),
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let file = load_probe_file(&args.config)?;
    let config = apply_overrides(file.evaluator.clone(), &args);
    let evaluator = Evaluator::new(config).context("invalid evaluator settings")?;
    let checks = file.check_set()?;
    let input: Arc<str> = Arc::from(args.input.as_str());

    let result = match evaluator.config().strategy {
        Strategy::Sequential => evaluator.evaluate(&checks, input),
        Strategy::Concurrent => {
            let (result, scheduler) = evaluator.evaluate_concurrent(&checks, input);
            // Leftover probes are killed (cancel) or awaited (drain) before
            // exit so no child process outlives the CLI.
            debug!(busy = scheduler.busy_workers(), "waiting for background probes");
            scheduler.join()?;
            result
        }
    };

    print_result(&result, args.format)?;
    Ok(if result.satisfied {
        exit_codes::MATCHED
    } else {
        exit_codes::NO_MATCH
    })
}

fn cmd_validate(path: &Path) -> Result<i32> {
    let file = load_probe_file(path)?;
    println!(
        "{}: {} probe(s), strategy {}",
        path.display(),
        file.probes.len(),
        file.evaluator.strategy
    );
    Ok(exit_codes::MATCHED)
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    write_probe_file(path, &ProbeFile::sample())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::MATCHED)
}

/// Command-line flags win over the probe file's `[evaluator]` table.
fn apply_overrides(mut config: EvaluatorConfig, args: &RunArgs) -> EvaluatorConfig {
    if let Some(strategy) = args.strategy {
        config.strategy = strategy.into();
    }
    if let Some(max_workers) = args.max_workers {
        config.max_workers = Some(max_workers);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = Some(timeout_ms);
    }
    if let Some(background) = args.background {
        config.background = background.into();
    }
    config
}

fn print_result(result: &EvaluationResult, format: Format) -> Result<()> {
    match format {
        Format::Json => {
            let payload = serde_json::to_string_pretty(result).context("serialize result")?;
            println!("{payload}");
        }
        Format::Text => print!("{}", render_text(result)),
    }
    Ok(())
}

fn render_text(result: &EvaluationResult) -> String {
    let mut out = String::new();
    match &result.matched {
        Some(check) => out.push_str(&format!("matched: {}\n", check.name)),
        None => out.push_str("no match\n"),
    }
    out.push_str(&format!("rejected: {}\n", result.rejected));
    for failure in &result.failures {
        out.push_str(&format!("failed: {failure}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyprobe::core::types::{CheckRef, Failure, FailureKind};

    #[test]
    fn parse_run_with_defaults() {
        let cli = Cli::parse_from(["anyprobe", "run", "db.internal"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.input, "db.internal");
        assert_eq!(args.config, PathBuf::from(DEFAULT_PROBE_FILE));
        assert_eq!(args.strategy, None);
        assert_eq!(args.format, Format::Text);
    }

    #[test]
    fn flags_override_file_settings() {
        let cli = Cli::parse_from([
            "anyprobe",
            "run",
            "--strategy",
            "sequential",
            "--max-workers",
            "2",
            "--timeout-ms",
            "750",
            "--background",
            "drain",
            "--format",
            "json",
            "x",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let file_config = EvaluatorConfig {
            max_workers: Some(8),
            ..EvaluatorConfig::default()
        };
        let config = apply_overrides(file_config, &args);
        assert_eq!(config.strategy, Strategy::Sequential);
        assert_eq!(config.max_workers, Some(2));
        assert_eq!(config.timeout_ms, Some(750));
        assert_eq!(config.background, BackgroundPolicy::Drain);
        assert_eq!(args.format, Format::Json);
    }

    #[test]
    fn unset_flags_keep_file_settings() {
        let cli = Cli::parse_from(["anyprobe", "run", "x"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let file_config = EvaluatorConfig {
            strategy: Strategy::Sequential,
            timeout_ms: Some(100),
            ..EvaluatorConfig::default()
        };
        assert_eq!(apply_overrides(file_config.clone(), &args), file_config);
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["anyprobe", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn text_rendering_lists_match_and_failures() {
        let result = EvaluationResult {
            satisfied: true,
            matched: Some(CheckRef::new(2, "replica")),
            failures: vec![Failure {
                check: Some(CheckRef::new(0, "primary")),
                kind: FailureKind::CheckFailed {
                    message: "timed out after 2000ms".to_string(),
                },
            }],
            rejected: 1,
        };
        assert_eq!(
            render_text(&result),
            "matched: replica\nrejected: 1\nfailed: #0 primary: check failed: timed out after 2000ms\n"
        );
    }
}
