//! Identities whose creation failed in one cycle, per target source.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use projsync_core::{IdentitySet, ProjectIdentity, SourceId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureSet(BTreeMap<SourceId, IdentitySet>);

impl FailureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source: &SourceId, identity: &ProjectIdentity) {
        self.0
            .entry(source.clone())
            .or_default()
            .insert(identity.clone());
    }

    pub fn get(&self, source: &SourceId) -> Option<&IdentitySet> {
        self.0.get(source)
    }

    pub fn contains(&self, source: &SourceId, identity: &ProjectIdentity) -> bool {
        self.0
            .get(source)
            .map(|set| set.contains(identity))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total failed (source, identity) pairs.
    pub fn len(&self) -> usize {
        self.0.values().map(IdentitySet::len).sum()
    }

    /// Every identity that failed in at least one source.
    pub fn identities(&self) -> IdentitySet {
        self.0.values().flat_map(|set| set.iter().cloned()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceId, &IdentitySet)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_per_source() {
        let mut failures = FailureSet::new();
        assert!(failures.is_empty());
        failures.record(&SourceId::from("fs"), &ProjectIdentity::from("C"));
        failures.record(&SourceId::from("fs"), &ProjectIdentity::from("D"));
        failures.record(&SourceId::from("api"), &ProjectIdentity::from("C"));

        assert_eq!(failures.len(), 3);
        assert_eq!(failures.identities().len(), 2);
        assert!(failures.contains(&SourceId::from("api"), &ProjectIdentity::from("C")));
        assert!(!failures.contains(&SourceId::from("api"), &ProjectIdentity::from("D")));
        assert!(failures.get(&SourceId::from("other")).is_none());
    }

    #[test]
    fn serializes_as_a_plain_map() {
        let mut failures = FailureSet::new();
        failures.record(&SourceId::from("fs"), &ProjectIdentity::from("C"));
        let json = serde_json::to_string(&failures).unwrap();
        assert_eq!(json, r#"{"fs":["C"]}"#);
    }
}
