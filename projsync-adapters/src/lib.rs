//! Source adapters for `projsync`.
//!
//! Each integrated system of record implements [`SourceAdapter`]. The trait
//! surface never returns errors: a failed read is an unavailable
//! [`SourceRead`], a failed creation is `false`, and the cause is logged here,
//! next to the protocol that produced it.

pub mod api_key;
pub mod error;
pub mod filesystem;
mod http;
mod oauth;
pub mod signed_api;
pub mod spreadsheet;

use projsync_core::{Attributes, Config, ProjectIdentity, SourceConfig, SourceId, SourceRead};

pub use api_key::ApiKeyAdapter;
pub use error::AdapterError;
pub use filesystem::{FilesystemAdapter, Materialized};
pub use signed_api::SignedApiAdapter;
pub use spreadsheet::SpreadsheetAdapter;

/// Capability the reconciliation engine needs from one system of record.
pub trait SourceAdapter: Send {
    fn id(&self) -> &SourceId;

    /// Read the current identity set. Never panics or errors; any transport or
    /// decode failure yields [`SourceRead::unavailable`].
    fn list_identities(&self) -> SourceRead;

    /// Create `identity`. Returns `true` only on a protocol-confirmed success;
    /// "already exists" counts as success. `attributes` is metadata gathered
    /// from other sources (possibly empty) for adapters that can use it.
    fn create_identity(&self, identity: &ProjectIdentity, attributes: &Attributes) -> bool;

    /// Read-only sources are never creation targets.
    fn writable(&self) -> bool {
        true
    }

    /// One-off start-up preparation, such as creating a missing root.
    fn prepare(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Outcome of a remote create call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Build the adapter for one configured source.
pub fn from_config(source: &SourceConfig) -> Result<Box<dyn SourceAdapter>, AdapterError> {
    Ok(match source {
        SourceConfig::Filesystem(cfg) => Box::new(FilesystemAdapter::from_config(cfg)),
        SourceConfig::ApiKey(cfg) => Box::new(ApiKeyAdapter::from_config(cfg)?),
        SourceConfig::SignedApi(cfg) => Box::new(SignedApiAdapter::from_config(cfg)?),
        SourceConfig::Spreadsheet(cfg) => Box::new(SpreadsheetAdapter::from_config(cfg)?),
    })
}

/// Build every configured adapter, in config order.
pub fn build_all(config: &Config) -> Result<Vec<Box<dyn SourceAdapter>>, AdapterError> {
    config.sources.iter().map(from_config).collect()
}
