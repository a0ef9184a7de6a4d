//! Snapshot of all sources and the side-effect-free creation plan.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use projsync_adapters::SourceAdapter;
use projsync_core::{Attributes, IdentitySet, ProjectIdentity, SourceId, SourceRead};

use crate::baseline::BaselineTracker;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One read of every source, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    reads: Vec<(SourceId, SourceRead)>,
}

impl Snapshot {
    /// Call `list_identities` on every adapter, sequentially.
    pub fn read(adapters: &[Box<dyn SourceAdapter>]) -> Self {
        Self {
            reads: adapters
                .iter()
                .map(|adapter| (adapter.id().clone(), adapter.list_identities()))
                .collect(),
        }
    }

    pub fn from_reads(reads: Vec<(SourceId, SourceRead)>) -> Self {
        Self { reads }
    }

    pub fn get(&self, source: &SourceId) -> Option<&SourceRead> {
        self.reads
            .iter()
            .find(|(id, _)| id == source)
            .map(|(_, read)| read)
    }

    pub fn is_available(&self, source: &SourceId) -> bool {
        self.get(source).map(|read| read.available).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceId, &SourceRead)> {
        self.reads.iter().map(|(id, read)| (id, read))
    }

    /// Union of the live sets of every available source.
    pub fn base_set(&self) -> IdentitySet {
        self.reads
            .iter()
            .filter(|(_, read)| read.available)
            .flat_map(|(_, read)| read.identities.iter().cloned())
            .collect()
    }

    /// Attributes for `identity`, merged over all available sources. On a
    /// key clash the earlier-configured source wins.
    pub fn attributes_for(&self, identity: &ProjectIdentity) -> Attributes {
        let mut merged = Attributes::new();
        for (_, read) in self.reads.iter().filter(|(_, read)| read.available) {
            if let Some(attrs) = read.attributes.get(identity) {
                for (key, value) in attrs {
                    merged.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        merged
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Why a source receives no creations this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unavailable,
    ReadOnly,
    BaselinePending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub base_set: IdentitySet,
    pub initial_union: IdentitySet,
    /// `base_set − initial_union`: identities that appeared after capture.
    pub update_set: IdentitySet,
    /// Per target, the update identities missing from its live set. Only
    /// available, captured, writable sources appear; empty sets are kept.
    pub to_create: BTreeMap<SourceId, IdentitySet>,
    pub skipped: BTreeMap<SourceId, SkipReason>,
}

impl Plan {
    pub fn creations(&self) -> usize {
        self.to_create.values().map(IdentitySet::len).sum()
    }

    pub fn is_target(&self, source: &SourceId) -> bool {
        self.to_create.contains_key(source)
    }
}

/// Compute base set, update set and per-target creation sets.
///
/// `writable` names the sources that accept creations. A source missing from
/// the snapshot is treated as unavailable.
pub fn plan(
    snapshot: &Snapshot,
    baselines: &BaselineTracker,
    writable: &BTreeSet<SourceId>,
) -> Plan {
    let base_set = snapshot.base_set();
    let initial_union = baselines.union();
    let update_set: IdentitySet = base_set.difference(&initial_union).cloned().collect();

    let mut to_create = BTreeMap::new();
    let mut skipped = BTreeMap::new();
    for (source, read) in snapshot.iter() {
        let reason = if !read.available {
            Some(SkipReason::Unavailable)
        } else if !writable.contains(source) {
            Some(SkipReason::ReadOnly)
        } else if !baselines.is_captured(source) {
            Some(SkipReason::BaselinePending)
        } else {
            None
        };
        match reason {
            Some(reason) => {
                skipped.insert(source.clone(), reason);
            }
            None => {
                let missing = update_set.difference(&read.identities).cloned().collect();
                to_create.insert(source.clone(), missing);
            }
        }
    }

    Plan {
        base_set,
        initial_union,
        update_set,
        to_create,
        skipped,
    }
}
