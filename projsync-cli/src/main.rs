//! projsync: keeps project identities in step across systems of record.
//!
//! # Usage
//!
//! ```text
//! projsync [--config <path>]            # same as `projsync run`
//! projsync run
//! projsync init
//! projsync check [--json]
//! projsync status | stop
//! projsync sync [--json]
//! projsync logs [--lines N]
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, daemon::LogsArgs, daemon::SyncArgs};
use projsync_core::config;

#[derive(Parser, Debug)]
#[command(
    name = "projsync",
    version,
    about = "Reconcile project identities across filesystem, APIs and spreadsheets",
    long_about = None,
)]
struct Cli {
    /// Configuration file (default: ~/.projsync/config.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the reconciliation daemon in the foreground.
    Run,

    /// Write a commented configuration template.
    Init,

    /// Read every source once and show what a first cycle would create.
    Check(CheckArgs),

    /// Query the running daemon.
    Status,

    /// Ask the running daemon to shut down.
    Stop,

    /// Run one reconciliation cycle in the daemon now.
    Sync(SyncArgs),

    /// Print recent log lines.
    Logs(LogsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let home = config::home().context("could not determine home directory")?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config::config_path_at(&home));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::daemon::run(&home, &config_path),
        Commands::Init => commands::init::run(&config_path),
        Commands::Check(args) => args.run(&config_path),
        Commands::Status => commands::daemon::status(&home),
        Commands::Stop => commands::daemon::stop(&home),
        Commands::Sync(args) => args.run(&home),
        Commands::Logs(args) => args.run(&home, &config_path),
    }
}
