//! The reconciliation cycle.
//!
//! ## `run_cycle`: steps
//!
//! 1. Read every adapter once, in configured order.
//! 2. Capture the baseline of any still-pending source that answered.
//! 3. Plan: `update_set = base_set − union(baselines)`, then per available,
//!    captured, writable target the update identities it lacks.
//! 4. Create, strictly one identity at a time per target.
//! 5. Advance the baselines of the sources that answered by
//!    `base_set − failures`. Failed identities stay in the next cycle's
//!    update set and are retried; everything else is settled, including for
//!    targets that were skipped this cycle.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use projsync_adapters::SourceAdapter;
use projsync_core::{IdentitySet, SourceId};

use crate::baseline::BaselineTracker;
use crate::failures::FailureSet;
use crate::plan::{plan, SkipReason, Snapshot};

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// What happened to one source during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub id: SourceId,
    pub available: bool,
    pub baseline_captured: bool,
    pub live_count: usize,
    pub created: IdentitySet,
    pub failed: IdentitySet,
    pub skipped: Option<SkipReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: Vec<SourceOutcome>,
    pub update_set: IdentitySet,
    /// Failed identities withheld from the baseline advance.
    pub pending: IdentitySet,
    pub failures: FailureSet,
}

impl CycleReport {
    pub fn created_count(&self) -> usize {
        self.sources.iter().map(|s| s.created.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    pub fn source(&self, id: &SourceId) -> Option<&SourceOutcome> {
        self.sources.iter().find(|s| &s.id == id)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    adapters: Vec<Box<dyn SourceAdapter>>,
    baselines: BaselineTracker,
    last_failures: FailureSet,
    cycles: u64,
}

impl Engine {
    pub fn new(adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        let baselines = BaselineTracker::new(adapters.iter().map(|a| a.id().clone()));
        Self {
            adapters,
            baselines,
            last_failures: FailureSet::new(),
            cycles: 0,
        }
    }

    pub fn adapters(&self) -> &[Box<dyn SourceAdapter>] {
        &self.adapters
    }

    pub fn baselines(&self) -> &BaselineTracker {
        &self.baselines
    }

    /// Failures of the most recent cycle.
    pub fn last_failures(&self) -> &FailureSet {
        &self.last_failures
    }

    /// Number of completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// One round of blocking baseline acquisition: read each pending source
    /// and capture those that answer. Returns the sources still pending.
    pub fn try_capture_baselines(&mut self) -> Vec<SourceId> {
        for adapter in &self.adapters {
            let id = adapter.id();
            if self.baselines.is_captured(id) {
                continue;
            }
            let read = adapter.list_identities();
            if read.available && self.baselines.capture(id, &read.identities) {
                tracing::info!(source = %id, identities = read.identities.len(), "baseline captured");
            }
        }
        self.baselines.pending_sources()
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.cycles += 1;
        let cycle = self.cycles;

        // Step 1 + 2: read, then lazily capture.
        let snapshot = Snapshot::read(&self.adapters);
        for (id, read) in snapshot.iter() {
            if read.available && self.baselines.capture(id, &read.identities) {
                tracing::info!(source = %id, identities = read.identities.len(), "baseline captured");
            }
        }

        // Step 3.
        let writable: BTreeSet<SourceId> = self
            .adapters
            .iter()
            .filter(|a| a.writable())
            .map(|a| a.id().clone())
            .collect();
        let plan = plan(&snapshot, &self.baselines, &writable);

        // Step 4.
        let mut failures = FailureSet::new();
        let mut sources = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let id = adapter.id();
            let read = snapshot.get(id);
            let mut created = IdentitySet::new();
            if let Some(targets) = plan.to_create.get(id) {
                for identity in targets {
                    let attributes = snapshot.attributes_for(identity);
                    if adapter.create_identity(identity, &attributes) {
                        tracing::info!(source = %id, identity = %identity, "identity created");
                        created.insert(identity.clone());
                    } else {
                        failures.record(id, identity);
                    }
                }
            }
            sources.push(SourceOutcome {
                id: id.clone(),
                available: read.map(|r| r.available).unwrap_or(false),
                baseline_captured: self.baselines.is_captured(id),
                live_count: read.map(|r| r.identities.len()).unwrap_or(0),
                created,
                failed: failures.get(id).cloned().unwrap_or_default(),
                skipped: plan.skipped.get(id).copied(),
            });
        }

        // Step 5.
        let pending = failures.identities();
        let advance: IdentitySet = plan.base_set.difference(&pending).cloned().collect();
        for (id, read) in snapshot.iter() {
            if read.available {
                self.baselines.absorb(id, &advance);
            }
        }

        let report = CycleReport {
            cycle,
            started_at,
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            sources,
            update_set: plan.update_set,
            pending,
            failures: failures.clone(),
        };
        self.last_failures = failures;

        if report.update_set.is_empty() {
            tracing::debug!(cycle, "cycle complete, nothing new");
        } else {
            tracing::info!(
                cycle,
                new = report.update_set.len(),
                created = report.created_count(),
                failed = report.failed_count(),
                pending = report.pending.len(),
                "cycle complete",
            );
        }
        report
    }
}
