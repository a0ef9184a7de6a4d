//! projsync core library: domain types, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: identity/source newtypes and the per-source read result
//! - [`config`]: YAML configuration load / validate / template
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{BaselinePolicy, Config, SourceConfig};
pub use error::ConfigError;
pub use types::{Attributes, IdentitySet, ProjectIdentity, SourceId, SourceRead};
