//! Per-source baselines.
//!
//! A baseline is the identity set a source had when it was first observed
//! available. Identities in the union of all baselines are never propagated.
//! Baselines live for the life of the process and only ever grow.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use projsync_core::{IdentitySet, SourceId};

/// Capture state of one source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "identities", rename_all = "snake_case")]
pub enum BaselineState {
    /// Not yet observed available. Contributes nothing to the union.
    #[default]
    Pending,
    /// Frozen at first successful read, then grown by absorption.
    Captured(IdentitySet),
}

impl BaselineState {
    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Captured(_))
    }

    pub fn identities(&self) -> Option<&IdentitySet> {
        match self {
            Self::Pending => None,
            Self::Captured(set) => Some(set),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineTracker {
    states: BTreeMap<SourceId, BaselineState>,
}

impl BaselineTracker {
    /// Every listed source starts out [`BaselineState::Pending`].
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = SourceId>,
    {
        Self {
            states: sources
                .into_iter()
                .map(|id| (id, BaselineState::Pending))
                .collect(),
        }
    }

    pub fn state(&self, source: &SourceId) -> Option<&BaselineState> {
        self.states.get(source)
    }

    pub fn get(&self, source: &SourceId) -> Option<&IdentitySet> {
        self.states.get(source).and_then(BaselineState::identities)
    }

    pub fn is_captured(&self, source: &SourceId) -> bool {
        self.states
            .get(source)
            .map(BaselineState::is_captured)
            .unwrap_or(false)
    }

    /// Freeze `identities` as the baseline of `source`.
    ///
    /// Returns `true` when this call performed the capture. A source that is
    /// already captured is left untouched: capture happens at most once.
    pub fn capture(&mut self, source: &SourceId, identities: &IdentitySet) -> bool {
        let state = self.states.entry(source.clone()).or_default();
        if state.is_captured() {
            return false;
        }
        *state = BaselineState::Captured(identities.clone());
        true
    }

    /// Grow a captured baseline. Pending sources are not affected; they get
    /// their baseline from their own first successful read.
    pub fn absorb(&mut self, source: &SourceId, identities: &IdentitySet) {
        if let Some(BaselineState::Captured(set)) = self.states.get_mut(source) {
            set.extend(identities.iter().cloned());
        }
    }

    /// Union of every captured baseline.
    pub fn union(&self) -> IdentitySet {
        self.states
            .values()
            .filter_map(BaselineState::identities)
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    /// Sources still waiting for their first successful read, in id order.
    pub fn pending_sources(&self) -> Vec<SourceId> {
        self.states
            .iter()
            .filter(|(_, state)| !state.is_captured())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn all_captured(&self) -> bool {
        self.states.values().all(BaselineState::is_captured)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceId, &BaselineState)> {
        self.states.iter()
    }
}
