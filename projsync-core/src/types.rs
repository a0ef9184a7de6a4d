//! Domain types shared by adapters, the engine and the daemon.
//!
//! Identities are compared by exact string equality. Nothing in this crate
//! trims, case-folds or otherwise normalises them; adapters hand over strings
//! in a comparable form.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque, case-sensitive project name used as the join key across sources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectIdentity(pub String);

impl ProjectIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Configured name of one adapter instance (e.g. `finmap`, `projects-dir`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Sets and reads
// ---------------------------------------------------------------------------

pub type IdentitySet = BTreeSet<ProjectIdentity>;

/// Column name → cell value for one identity. Passed through to creation
/// calls untouched; never part of identity matching.
pub type Attributes = BTreeMap<String, String>;

/// Result of one `list_identities` call against a source.
///
/// `available == false` means "no information": the set is empty but must not
/// be read as "the source has no projects".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceRead {
    pub identities: IdentitySet,
    pub attributes: BTreeMap<ProjectIdentity, Attributes>,
    pub available: bool,
}

impl SourceRead {
    /// A successful read without attribute payload.
    pub fn available(identities: IdentitySet) -> Self {
        Self {
            identities,
            attributes: BTreeMap::new(),
            available: true,
        }
    }

    /// A successful read carrying per-identity attributes.
    pub fn with_attributes(attributes: BTreeMap<ProjectIdentity, Attributes>) -> Self {
        Self {
            identities: attributes.keys().cloned().collect(),
            attributes,
            available: true,
        }
    }

    /// A failed read.
    pub fn unavailable() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
