//! `projsync check [--json]`: one read of every source, nothing written.
//!
//! Planned against an empty baseline, so "missing" lists every identity some
//! other source has and this one lacks. A running daemon would only create
//! the subset that appeared after its baselines were captured.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use projsync_core::{Config, IdentitySet, SourceId};
use projsync_engine::{plan, BaselineTracker, Plan, SkipReason, Snapshot};

use super::{join_identities, skip_label};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckArgs {
    pub fn run(self, config_path: &Path) -> Result<()> {
        let config = Config::load_from(config_path).with_context(|| {
            format!(
                "failed to load {}; run `projsync init` to create one",
                config_path.display()
            )
        })?;
        projsync_daemon::logging::init_stderr("warn");

        let adapters =
            projsync_adapters::build_all(&config).context("failed to build source adapters")?;
        let snapshot = Snapshot::read(&adapters);
        let writable: BTreeSet<SourceId> = adapters
            .iter()
            .filter(|adapter| adapter.writable())
            .map(|adapter| adapter.id().clone())
            .collect();

        let mut baselines = BaselineTracker::new(adapters.iter().map(|a| a.id().clone()));
        for adapter in &adapters {
            baselines.capture(adapter.id(), &IdentitySet::new());
        }
        let plan = plan(&snapshot, &baselines, &writable);

        let report = build_report(&config, &snapshot, &plan, &writable);
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize check JSON")?
            );
        } else {
            print_table(&report);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    /// Union of every available source.
    base_set: IdentitySet,
    sources: Vec<SourceCheck>,
}

#[derive(Debug, Serialize)]
struct SourceCheck {
    id: SourceId,
    kind: &'static str,
    available: bool,
    writable: bool,
    identities: usize,
    /// `None` when the source is not a creation target.
    missing: Option<IdentitySet>,
    skipped: Option<SkipReason>,
}

fn build_report(
    config: &Config,
    snapshot: &Snapshot,
    plan: &Plan,
    writable: &BTreeSet<SourceId>,
) -> CheckReport {
    let sources = config
        .sources
        .iter()
        .map(|source| {
            let id = source.id();
            let read = snapshot.get(id);
            let skipped = plan.skipped.get(id).copied();
            SourceCheck {
                id: id.clone(),
                kind: source.kind_name(),
                available: read.is_some_and(|r| r.available),
                writable: writable.contains(id),
                identities: read.map_or(0, |r| r.identities.len()),
                missing: plan.to_create.get(id).cloned(),
                skipped,
            }
        })
        .collect();
    CheckReport {
        base_set: plan.base_set.clone(),
        sources,
    }
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "identities")]
    identities: String,
    #[tabled(rename = "missing")]
    missing: String,
}

fn print_table(report: &CheckReport) {
    println!(
        "projsync v{} | {} sources | {} identities overall",
        env!("CARGO_PKG_VERSION"),
        report.sources.len(),
        report.base_set.len(),
    );

    let rows: Vec<CheckRow> = report
        .sources
        .iter()
        .map(|source| CheckRow {
            source: source.id.to_string(),
            kind: source.kind.to_string(),
            status: status_label(source),
            identities: if source.available {
                source.identities.to_string()
            } else {
                "-".to_string()
            },
            missing: match &source.missing {
                Some(missing) if missing.is_empty() => "none".to_string(),
                Some(missing) => format!("{}: {}", missing.len(), join_identities(missing)),
                None => "-".to_string(),
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    println!(
        "Indicators: {} IN STEP  {} MISSING  {} READ-ONLY  {} UNAVAILABLE",
        "■".green().bold(),
        "■".yellow().bold(),
        "■".bright_black().bold(),
        "■".red().bold(),
    );
}

fn status_label(source: &SourceCheck) -> String {
    let label = match (source.skipped, &source.missing) {
        (Some(reason), _) => skip_label(reason),
        (None, Some(missing)) if !missing.is_empty() => "missing",
        (None, _) => "in step",
    };
    let indicator = match (source.skipped, &source.missing) {
        (Some(SkipReason::Unavailable), _) => "■".red().bold(),
        (Some(_), _) => "■".bright_black().bold(),
        (None, Some(missing)) if !missing.is_empty() => "■".yellow().bold(),
        (None, _) => "■".green().bold(),
    };
    format!("{indicator} {label}")
}
