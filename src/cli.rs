//! Command-line interface definitions
//!
//! Provides CLI argument parsing using clap for the billing replay tool.

use std::path::PathBuf;

use clap::Parser;

use crate::types::{BillingConfig, Result};

/// Replay a scripted navigation lifecycle against the billing ledger
#[derive(Parser, Debug, Clone)]
#[command(name = "nav-billing-replay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Replay script (JSON)
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Enable diagnostic mode (auto-log to temp file)
    #[arg(short, long)]
    pub diagnostic: bool,

    /// Log directory (implies diagnostic mode)
    #[arg(short = 'l', long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log file name (implies diagnostic mode)
    #[arg(short = 'f', long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long)]
    pub quiet: bool,

    /// Do not send billing events after a type starts billing
    #[arg(long)]
    pub no_billing_events: bool,

    /// Waypoint tolerance in meters for route changes
    #[arg(long, value_name = "METERS")]
    pub route_tolerance: Option<f64>,

    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            script: PathBuf::from("replay.json"),
            diagnostic: false,
            log_dir: None,
            log_file: None,
            verbose: 0,
            quiet: false,
            no_billing_events: false,
            route_tolerance: None,
            pretty: false,
        }
    }
}

impl Cli {
    /// Check if diagnostic mode is enabled (output to file)
    ///
    /// Returns true if `--diagnostic` is set, or if `--log-dir` or `--log-file` is specified.
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic || self.log_dir.is_some() || self.log_file.is_some()
    }

    /// Get the log level based on CLI arguments
    ///
    /// - `--quiet`: ERROR
    /// - default: INFO
    /// - `-v`: DEBUG
    /// - `-vv` or more: TRACE
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }

    /// Get the log file path for diagnostic mode
    ///
    /// Uses the specified log directory and file name, or defaults to:
    /// - Directory: system temp directory
    /// - File: `nav-billing-replay-{timestamp}.log`
    pub fn log_path(&self) -> PathBuf {
        let dir = self.log_dir.clone().unwrap_or_else(std::env::temp_dir);

        let filename = self.log_file.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("nav-billing-replay-{timestamp}.log")
        });

        dir.join(filename)
    }

    /// Apply CLI overrides on top of a base configuration
    pub fn apply_to(&self, config: BillingConfig) -> Result<BillingConfig> {
        let mut config = config;
        if self.no_billing_events {
            config = config.with_billing_events(false);
        }
        if let Some(meters) = self.route_tolerance {
            config = config.with_route_change_tolerance(meters);
        }
        config.validate()?;
        Ok(config)
    }
}
