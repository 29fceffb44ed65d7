//! Replay tool runner
//!
//! Entry point for the `nav-billing-replay` binary.

use std::time::Instant;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::Cli;
use crate::replay::{Replay, ReplayReport, ReplayScript};
use crate::tracing::ErrorTraceExt;
use crate::types::{BillingConfig, BillingError, Result};

/// Build an EnvFilter based on CLI args and RUST_LOG environment variable
///
/// Priority: RUST_LOG environment variable > CLI arguments (-v, -vv, -q)
fn build_env_filter(cli: &Cli) -> tracing_subscriber::EnvFilter {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            return tracing_subscriber::EnvFilter::new(rust_log);
        }
    }

    let level = cli.log_level();
    tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into())
}

/// Initialize logging with file output (diagnostic mode)
fn init_logging_to_file(cli: &Cli) -> anyhow::Result<()> {
    let filter = build_env_filter(cli);
    let log_path = cli.log_path();

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(&log_path)?;

    // stdout carries the report, so the log location goes to stderr
    eprintln!("Diagnostic mode: logging to {}", log_path.display());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

/// Initialize logging with stderr output (normal mode)
fn init_logging_to_stderr(cli: &Cli) -> anyhow::Result<()> {
    let filter = build_env_filter(cli);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

/// Initialize logging based on CLI arguments
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    if cli.is_diagnostic() {
        init_logging_to_file(cli)
    } else {
        init_logging_to_stderr(cli)
    }
}

fn logged<T>(result: Result<T>) -> Result<T> {
    result.inspect_err(|e| {
        e.trace_error();
    })
}

/// Load the script, replay it and return the report
///
/// Configuration comes from the environment with CLI flags on top.
pub async fn replay_with_cli(cli: &Cli) -> anyhow::Result<ReplayReport> {
    let config = cli.apply_to(BillingConfig::from_env()?)?;
    tracing::info!(
        billing_events_enabled = config.billing_events_enabled,
        route_change_tolerance_meters = config.route_change_tolerance_meters,
        "Billing configuration loaded"
    );

    let script = logged(ReplayScript::load(&cli.script).await)?;
    tracing::info!(
        script = %cli.script.display(),
        steps = script.steps.len(),
        "Replay script loaded"
    );

    let report = logged(Replay::new(config)?.run(&script).await)?;
    Ok(report)
}

/// Run the replay tool with CLI arguments
///
/// Initializes logging, replays the script and prints the JSON report to
/// stdout.
pub async fn run_replay_with_cli(cli: &Cli) -> anyhow::Result<()> {
    let started = Instant::now();
    init_logging(cli)?;

    tracing::info!(
        version = %env!("CARGO_PKG_VERSION"),
        pid = %std::process::id(),
        diagnostic = cli.is_diagnostic(),
        "Billing replay starting"
    );

    let report = replay_with_cli(cli).await?;
    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    };
    let json = logged(json.map_err(BillingError::from))?;
    println!("{json}");

    tracing::info!(
        events = report.events.len(),
        billing_events = report.billing_events,
        held_calls = report.held_calls,
        elapsed_ms = started.elapsed().as_millis(),
        "Billing replay complete"
    );
    Ok(())
}
