//! `projsync run | status | stop | sync | logs`: daemon lifecycle and control.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use projsync_core::{config, Config, IdentitySet};
use projsync_daemon::paths::socket_path;
use projsync_daemon::{request_status, request_stop, request_sync, start_blocking, DaemonError};
use projsync_engine::{CycleReport, SourceOutcome};

use super::{join_identities, skip_label};

/// Run the daemon in the foreground until ctrl-c, SIGTERM or `projsync stop`.
pub fn run(home: &Path, config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "no configuration at {}; run `projsync init` first",
            config_path.display()
        );
    }
    start_blocking(home, Some(config_path)).context("daemon exited with error")
}

pub fn status(home: &Path) -> Result<()> {
    let socket = socket_path(home);
    let payload = match request_status(&socket) {
        Ok(status) => status,
        Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
            "running": false,
            "socket": socket.display().to_string(),
        }),
        Err(err) => return Err(err).context("failed to query daemon status"),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to render daemon status JSON")?
    );
    Ok(())
}

pub fn stop(home: &Path) -> Result<()> {
    match request_stop(&socket_path(home)) {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Print the raw cycle report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let raw = match request_sync(&socket_path(home)) {
            Ok(raw) => raw,
            Err(DaemonError::DaemonNotRunning { socket }) => anyhow::bail!(
                "daemon is not running (no socket at {}); start it with `projsync run`",
                socket.display()
            ),
            Err(err) => return Err(err).context("sync request failed"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&raw).context("failed to render cycle report")?
            );
            return Ok(());
        }

        let report: CycleReport =
            serde_json::from_value(raw).context("daemon returned an unreadable cycle report")?;
        print_report(&report);
        Ok(())
    }
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "live")]
    live: usize,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "failed")]
    failed: String,
}

fn print_report(report: &CycleReport) {
    println!(
        "cycle {} | {} ms | {} new | {} created | {} failed",
        report.cycle,
        report.duration_ms,
        report.update_set.len(),
        report.created_count(),
        report.failed_count(),
    );

    let rows: Vec<OutcomeRow> = report.sources.iter().map(outcome_row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if !report.pending.is_empty() {
        println!(
            "{} retried next cycle: {}",
            "■".yellow().bold(),
            join_identities(&report.pending)
        );
    }
}

fn outcome_row(outcome: &SourceOutcome) -> OutcomeRow {
    let state = match outcome.skipped {
        Some(reason) => skip_label(reason).to_string(),
        None => "target".to_string(),
    };
    OutcomeRow {
        source: outcome.id.to_string(),
        state,
        live: outcome.live_count,
        created: list_or_dash(&outcome.created),
        failed: list_or_dash(&outcome.failed),
    }
}

fn list_or_dash(set: &IdentitySet) -> String {
    if set.is_empty() {
        "-".to_string()
    } else {
        join_identities(set)
    }
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,
}

impl LogsArgs {
    pub fn run(self, home: &Path, config_path: &Path) -> Result<()> {
        // Without a readable config the default location is the best guess.
        let log_file = match Config::load_from(config_path) {
            Ok(config) => config.log_file_at(home),
            Err(_) => config::default_log_file_at(home),
        };
        print_tail(&log_file, self.lines)
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if lines == 0 {
            continue;
        }
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
