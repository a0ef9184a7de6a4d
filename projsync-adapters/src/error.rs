//! Error types for projsync-adapters.
//!
//! These never cross the [`SourceAdapter`](crate::SourceAdapter) surface: the
//! trait methods turn them into an availability flag or a `false` creation
//! result after logging them.

use std::path::PathBuf;

use thiserror::Error;

use projsync_core::ConfigError;

/// All errors that can arise while talking to one external system.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Adapter could not be built from its configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Transport failure or a non-2xx status reported by ureq.
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(#[source] std::io::Error),

    /// The response body was not the JSON shape we expect.
    #[error("failed to decode response: {0}")]
    Json(#[from] serde_json::Error),

    /// A 2xx status other than the one the protocol uses to confirm success.
    #[error("unexpected HTTP status {actual} (expected {expected})")]
    UnexpectedStatus { expected: u16, actual: u16 },

    /// The API answered with its own failure envelope.
    #[error("API call '{action}' failed: {message}")]
    Api { action: String, message: String },

    /// Well-formed JSON / table that is missing something we need.
    #[error("malformed payload: {0}")]
    Shape(String),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A project path exists but is a file (or other non-directory).
    #[error("{path} already exists, but is not a directory")]
    NotADirectory { path: PathBuf },

    /// The identity cannot be represented in this system.
    #[error("identity '{identity}' is not usable here: {reason}")]
    InvalidIdentity {
        identity: String,
        reason: &'static str,
    },
}

/// Convenience constructor for [`AdapterError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AdapterError {
    AdapterError::Io {
        path: path.into(),
        source,
    }
}
