//! Dispatch CLI
//!
//! Command-line front end for the task dispatcher.
//!
//! # Usage
//!
//! ```bash
//! # Run 20 tasks against simulated providers
//! dispatch smoke --tasks 20 --simulate
//!
//! # Same run against the configured HTTP providers, JSON output
//! dispatch smoke --tasks 20 --json
//!
//! # Probe every enabled provider
//! dispatch validate --min-working 3
//!
//! # With verbose logging
//! RUST_LOG=debug dispatch smoke --simulate
//! ```
//!
//! # Environment Variables
//!
//! - `DISPATCHER_CONFIG`: Configuration file path
//! - `DISPATCHER_MAX_WORKERS`, `DISPATCHER_COORDINATOR`, ...: see the core
//!   crate's `config::env` module
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Exit Status
//!
//! `smoke` exits with 1 when the offload target is missed, `validate` when
//! too few providers answered.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use dispatcher_core::{
    load_config, load_config_from_path, validate_providers, BatchOptions, ConfigOverrides,
    Dispatcher, DispatcherConfigFile, ExecutionEngine, ProviderRegistry, StatsCollector,
    StatsSummary, Task, DEFAULT_MIN_WORKING,
};

/// Dispatch - fan prompts out across rate-limited model providers
#[derive(Parser, Debug)]
#[command(name = "dispatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, env = "DISPATCHER_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a batch of numbered tasks and report routing statistics
    Smoke(SmokeArgs),
    /// Probe every enabled provider with a one-line prompt
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
struct SmokeArgs {
    /// Number of tasks to submit
    #[arg(short = 'n', long, default_value_t = 20)]
    tasks: usize,

    /// Use in-process simulated providers instead of HTTP clients
    #[arg(long)]
    simulate: bool,

    /// Base latency of a simulated provider with speed weight 1.0
    #[arg(long, default_value_t = 200, value_name = "MS")]
    latency_ms: u64,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// Global worker cap
    #[arg(short = 'w', long)]
    max_workers: Option<usize>,

    /// Batch deadline
    #[arg(long, value_name = "MS")]
    deadline_ms: Option<u64>,

    /// Provider the offload target is measured against
    #[arg(long)]
    coordinator: Option<String>,

    /// Required offload fraction
    #[arg(long)]
    threshold: Option<f64>,

    /// Per-call provider timeout
    #[arg(long, value_name = "MS")]
    call_timeout_ms: Option<u64>,
}

impl SmokeArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            max_workers: self.max_workers,
            batch_deadline_ms: self.deadline_ms,
            coordinator_provider: self.coordinator.clone(),
            target_threshold: self.threshold,
            call_timeout_ms: self.call_timeout_ms,
        }
    }
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Working providers required to pass
    #[arg(short = 'm', long, default_value_t = DEFAULT_MIN_WORKING)]
    min_working: usize,

    /// Per-probe timeout
    #[arg(long, default_value_t = 30_000, value_name = "MS")]
    timeout_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

/// JSON shape of a smoke run
#[derive(Serialize)]
struct SmokeReport {
    tasks: usize,
    succeeded: usize,
    failed: usize,
    elapsed_ms: u64,
    #[serde(flatten)]
    summary: StatsSummary,
}

fn smoke_tasks(count: usize) -> Vec<Task> {
    (1..=count)
        .map(|i| {
            Task::new(
                format!("task-{i}"),
                format!("Task {i}: summarise the benefits of parallel processing in one line."),
            )
            .with_max_tokens(50)
        })
        .collect()
}

fn load(path: Option<PathBuf>) -> Result<DispatcherConfigFile> {
    let config = match path {
        Some(path) => load_config_from_path(Some(path.clone()))
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => load_config().context("Failed to load config")?,
    };
    Ok(config)
}

fn build_registry(
    config: &DispatcherConfigFile,
    simulate: bool,
    latency: Duration,
) -> Result<ProviderRegistry> {
    if simulate {
        return config
            .build_simulated_registry(latency)
            .context("Failed to build simulated providers");
    }

    for (provider, variable) in config.missing_api_keys() {
        warn!(provider = %provider, env = %variable, "Missing API key");
        eprintln!("{provider}: {variable} not set, provider disabled");
    }
    config
        .build_registry()
        .context("Failed to build provider registry")
}

/// Run the smoke batch; returns whether the offload target was met
async fn run_smoke(mut config: DispatcherConfigFile, args: SmokeArgs) -> Result<bool> {
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let registry = Arc::new(build_registry(
        &config,
        args.simulate,
        Duration::from_millis(args.latency_ms),
    )?);
    if !registry.has_enabled() {
        anyhow::bail!("No enabled providers; set API keys or use --simulate");
    }

    let stats = Arc::new(StatsCollector::new(
        config.coordinator_provider.clone(),
        config.target_threshold,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        Arc::clone(&stats),
        config.dispatch.clone(),
    ));
    let engine = ExecutionEngine::new(dispatcher, config.max_workers)?;

    info!(
        tasks = args.tasks,
        simulate = args.simulate,
        max_workers = config.max_workers,
        "Starting smoke run"
    );

    let started = Instant::now();
    let options: BatchOptions = config.batch_options();
    let outcome = engine
        .submit(smoke_tasks(args.tasks), options)
        .await
        .context("Batch rejected")?;
    let elapsed = started.elapsed();
    let summary = stats.summary();

    if args.json {
        let report = SmokeReport {
            tasks: outcome.results.len(),
            succeeded: outcome.succeeded(),
            failed: outcome.failed(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            summary: summary.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in &outcome.results {
            match &result.error {
                None => println!(
                    "{:10} {:10} {:>6}ms",
                    result.task_id.as_str(),
                    result.provider.as_deref().unwrap_or("-"),
                    result.latency.as_millis()
                ),
                Some(error) => println!(
                    "{:10} {:10} FAILED: {error}",
                    result.task_id.as_str(),
                    result.provider.as_deref().unwrap_or("-")
                ),
            }
        }
        println!();
        println!(
            "{} succeeded, {} failed in {:.2}s",
            outcome.succeeded(),
            outcome.failed(),
            elapsed.as_secs_f64()
        );
        println!("{}", summary.stats);
    }

    Ok(summary.target_met)
}

/// Probe providers; returns whether enough of them answered
async fn run_validate(config: DispatcherConfigFile, args: ValidateArgs) -> Result<bool> {
    let registry = build_registry(&config, false, Duration::ZERO)?;
    let report = validate_providers(
        &registry,
        args.min_working,
        Duration::from_millis(args.timeout_ms),
    )
    .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    Ok(report.passed())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so JSON output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dispatch=info".parse()?)
                .add_directive("dispatcher_core=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = load(cli.config)?;

    let passed = match cli.command {
        Command::Smoke(args) => run_smoke(config, args).await?,
        Command::Validate(args) => run_validate(config, args).await?,
    };
    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_smoke_arguments() {
        let cli = Cli::try_parse_from([
            "dispatch",
            "smoke",
            "--tasks",
            "5",
            "--simulate",
            "--coordinator",
            "a",
            "--threshold",
            "0.5",
        ])
        .unwrap();

        let Command::Smoke(args) = cli.command else {
            panic!("expected smoke");
        };
        assert_eq!(args.tasks, 5);
        assert!(args.simulate);
        assert!(!args.json);

        let overrides = args.overrides();
        assert_eq!(overrides.coordinator_provider.as_deref(), Some("a"));
        assert_eq!(overrides.target_threshold, Some(0.5));
        assert_eq!(overrides.max_workers, None);
    }

    #[test]
    fn test_validate_defaults() {
        let cli = Cli::try_parse_from(["dispatch", "validate"]).unwrap();
        let Command::Validate(args) = cli.command else {
            panic!("expected validate");
        };
        assert_eq!(args.min_working, DEFAULT_MIN_WORKING);
        assert_eq!(args.timeout_ms, 30_000);
    }

    #[test]
    fn test_smoke_tasks_are_numbered() {
        let tasks = smoke_tasks(3);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id.as_str(), "task-1");
        assert_eq!(tasks[2].id.as_str(), "task-3");
        assert!(tasks.iter().all(|t| t.requested_provider.is_none()));
    }

    #[tokio::test]
    async fn test_simulated_smoke_meets_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[batch]
coordinator_provider = "grok"
target_threshold = 0.9
"#,
        )
        .unwrap();

        let config = load(Some(path)).unwrap();
        let args = SmokeArgs {
            tasks: 10,
            simulate: true,
            latency_ms: 5,
            json: true,
            max_workers: Some(4),
            deadline_ms: None,
            coordinator: None,
            threshold: None,
            call_timeout_ms: None,
        };
        assert!(run_smoke(config, args).await.unwrap());
    }
}
