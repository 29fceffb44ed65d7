//! Billing replay binary
//!
//! Run with: cargo run -- script.json
//!
//! For help: cargo run -- --help

use clap::Parser;
use nav_billing::{cli::Cli, run_replay_with_cli};
use std::io::IsTerminal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = run_replay_with_cli(&cli).await {
        // stdout is reserved for the report
        eprintln!("Error: {:#}", e);

        if std::io::stderr().is_terminal() {
            eprintln!("\nFor debugging, run with --diagnostic to log to a file.");
            eprintln!("Or use -v/-vv/-vvv for more verbose logging.");
        }

        std::process::exit(1);
    }

    Ok(())
}
