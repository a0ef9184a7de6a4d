//! Error types for projsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the file that caused it.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}; run `projsync init` to create one")]
    NotFound { path: PathBuf },

    /// Semantically invalid configuration.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// A secret referenced an environment variable that is not set.
    #[error("secret for source '{source_id}' references unset environment variable {var}")]
    MissingSecret { source_id: String, var: String },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.projsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
