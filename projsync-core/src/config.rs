//! YAML configuration for the reconciliation daemon.
//!
//! # Storage layout
//!
//! ```text
//! ~/.projsync/
//!   config.yaml     (mode 0600: carries API secrets)
//!   logs/
//!   run/
//! ```
//!
//! # API pattern
//!
//! As elsewhere in the workspace, functions that touch the home directory come
//! in two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::SourceId;

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.projsync/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".projsync")
}

/// `<home>/.projsync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

/// `<home>/.projsync/logs/projsync.log`, used when `log.file` is unset.
pub fn default_log_file_at(home: &Path) -> PathBuf {
    root_at(home).join("logs").join("projsync.log")
}

/// Home directory as reported by `dirs::home_dir()`.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// 2. Schema
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between the end of one reconciliation cycle and the next tick.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub baseline: BaselineConfig,

    #[serde(default)]
    pub log: LogConfig,

    /// Sources in priority order. Earlier sources win when several supply
    /// attributes for the same identity.
    pub sources: Vec<SourceConfig>,
}

/// How the first "pre-existing" identity set of each source is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BaselinePolicy {
    /// Wait until every source has been read once before the first cycle.
    #[default]
    Blocking,
    /// Start cycling at once; each source is baselined on its first good read.
    Lazy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineConfig {
    #[serde(default)]
    pub policy: BaselinePolicy,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Rounds of blocking capture before falling back to lazy capture for the
    /// remaining sources. `None` waits until shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            policy: BaselinePolicy::default(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log file path. Defaults to `~/.projsync/logs/projsync.log`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// `tracing` filter directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
            format: LogFormat::default(),
            max_bytes: default_log_max_bytes(),
            max_files: default_log_max_files(),
        }
    }
}

/// A secret given inline or by environment variable name.
///
/// ```yaml
/// api_key: "f06f…"          # literal
/// api_key: { env: FINMAP_KEY }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretRef {
    Env { env: String },
    Literal(String),
}

impl SecretRef {
    /// Resolve to the secret value. Environment references are read at call
    /// time, so adapters should resolve once at construction.
    pub fn resolve(&self, source: &SourceId) -> Result<String, ConfigError> {
        match self {
            SecretRef::Literal(value) => Ok(value.clone()),
            SecretRef::Env { env } => {
                std::env::var(env).map_err(|_| ConfigError::MissingSecret {
                    source_id: source.0.clone(),
                    var: env.clone(),
                })
            }
        }
    }
}

/// One configured source, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Filesystem(FilesystemSource),
    ApiKey(ApiKeySource),
    SignedApi(SignedApiSource),
    Spreadsheet(SpreadsheetSource),
}

impl SourceConfig {
    pub fn id(&self) -> &SourceId {
        match self {
            SourceConfig::Filesystem(s) => &s.id,
            SourceConfig::ApiKey(s) => &s.id,
            SourceConfig::SignedApi(s) => &s.id,
            SourceConfig::Spreadsheet(s) => &s.id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SourceConfig::Filesystem(_) => "filesystem",
            SourceConfig::ApiKey(_) => "api_key",
            SourceConfig::SignedApi(_) => "signed_api",
            SourceConfig::Spreadsheet(_) => "spreadsheet",
        }
    }
}

/// Local directory tree: one directory per project plus fixed sub-directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemSource {
    pub id: SourceId,
    pub root: PathBuf,
    /// Created in this order under every new project directory.
    #[serde(default = "default_subdirectories")]
    pub subdirectories: Vec<String>,
    /// Create `root` at daemon start-up if it is missing.
    #[serde(default = "default_true")]
    pub create_root: bool,
}

/// HTTP+JSON API authenticated by a static key header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeySource {
    pub id: SourceId,
    pub base_url: String,
    pub api_key: SecretRef,
    #[serde(default = "default_api_key_header")]
    pub header: String,
    #[serde(default = "default_projects_path")]
    pub list_path: String,
    #[serde(default = "default_projects_path")]
    pub create_path: String,
    /// JSON field carrying the project name in list items and create bodies.
    #[serde(default = "default_label_field")]
    pub label_field: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// HTTP+JSON API authenticated by `hash=md5(page + action + secret)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedApiSource {
    pub id: SourceId,
    pub base_url: String,
    #[serde(default = "default_signed_api_path")]
    pub api_path: String,
    pub secret: SecretRef,
    #[serde(default = "default_list_action")]
    pub list_action: String,
    #[serde(default = "default_create_action")]
    pub create_action: String,
    /// Value of the `status` filter on list calls; omitted when `None`.
    #[serde(default = "default_status_filter")]
    pub status_filter: Option<String>,
    #[serde(default)]
    pub members: ProjectMembers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_task: Option<DefaultTaskConfig>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// E-mail addresses attached to every created project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProjectMembers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
}

/// Task created inside every new remote project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultTaskConfig {
    /// Title template; `{code}` and `{identity}` are substituted.
    #[serde(default = "default_task_title")]
    pub title: String,
    #[serde(default = "default_task_action")]
    pub action: String,
    /// Spreadsheet columns turned into `"<column>: <value>"` subtasks.
    #[serde(default)]
    pub subtask_columns: Vec<String>,
}

/// Role of a spreadsheet column, keyed by header name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Identity,
    Attribute,
    Ignore,
}

/// Read-only spreadsheet feed (Sheets v4 `values` API).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadsheetSource {
    pub id: SourceId,
    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,
    pub spreadsheet_id: String,
    /// A1 range including the header row, e.g. `Projects!A:N`.
    pub range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretRef>,
    /// Refresh-token credentials; access tokens are minted on demand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthRefresh>,
    /// Header name → role. Unlisted columns are attributes; with no
    /// `identity` entry, column 0 is the identity column.
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnRole>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// OAuth2 refresh-token grant for a spreadsheet source.
///
/// ```yaml
/// oauth:
///   client_id: { env: SHEETS_CLIENT_ID }
///   client_secret: { env: SHEETS_CLIENT_SECRET }
///   refresh_token: { env: SHEETS_REFRESH_TOKEN }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthRefresh {
    pub client_id: SecretRef,
    pub client_secret: SecretRef,
    pub refresh_token: SecretRef,
    #[serde(default = "default_oauth_token_url")]
    pub token_url: String,
}

// ---------------------------------------------------------------------------
// 3. Load / validate
// ---------------------------------------------------------------------------

impl Config {
    /// Parse and validate YAML. `path` is only used for error context.
    pub fn from_yaml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file path.
    ///
    /// Returns `ConfigError::NotFound` if absent,
    /// `ConfigError::Parse` (with path + line context) if malformed YAML.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::from_yaml_str(&contents, path)
    }

    /// Load `<home>/.projsync/config.yaml`.
    pub fn load_at(home: &Path) -> Result<Self, ConfigError> {
        Self::load_from(&config_path_at(home))
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_at(&home()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("no sources configured".to_string()));
        }
        if self.baseline.initial_backoff_ms == 0
            || self.baseline.initial_backoff_ms > self.baseline.max_backoff_ms
        {
            return Err(ConfigError::Invalid(
                "baseline backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms"
                    .to_string(),
            ));
        }
        if self.log.max_files == 0 {
            return Err(ConfigError::Invalid("log.max_files must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            let id = source.id();
            if id.0.trim().is_empty() {
                return Err(ConfigError::Invalid("source id must not be empty".to_string()));
            }
            if !seen.insert(id.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate source id '{id}'")));
            }
            match source {
                SourceConfig::Filesystem(fs) => validate_filesystem(fs)?,
                SourceConfig::Spreadsheet(sheet) => validate_spreadsheet(sheet)?,
                SourceConfig::ApiKey(_) | SourceConfig::SignedApi(_) => {}
            }
        }
        Ok(())
    }

    /// Log file path, falling back to `<home>/.projsync/logs/projsync.log`.
    pub fn log_file_at(&self, home: &Path) -> PathBuf {
        self.log
            .file
            .clone()
            .unwrap_or_else(|| default_log_file_at(home))
    }
}

fn validate_filesystem(source: &FilesystemSource) -> Result<(), ConfigError> {
    for name in &source.subdirectories {
        let bad = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\');
        if bad {
            return Err(ConfigError::Invalid(format!(
                "source '{}': invalid subdirectory name '{name}'",
                source.id
            )));
        }
    }
    Ok(())
}

fn validate_spreadsheet(source: &SpreadsheetSource) -> Result<(), ConfigError> {
    let identity_columns = source
        .columns
        .values()
        .filter(|role| **role == ColumnRole::Identity)
        .count();
    if source.access_token.is_some() && source.oauth.is_some() {
        return Err(ConfigError::Invalid(format!(
            "source '{}': access_token and oauth are mutually exclusive",
            source.id
        )));
    }
    if identity_columns > 1 {
        return Err(ConfigError::Invalid(format!(
            "source '{}': more than one column has role 'identity'",
            source.id
        )));
    }
    if source.access_token.is_none() && source.api_key.is_none() && source.oauth.is_none() {
        return Err(ConfigError::Invalid(format!(
            "source '{}': spreadsheet needs one of access_token, api_key or oauth",
            source.id
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Template
// ---------------------------------------------------------------------------

/// Commented starting point written by `projsync init`.
pub const TEMPLATE: &str = r#"# projsync configuration
poll_interval_secs: 5

baseline:
  policy: blocking        # blocking | lazy
  initial_backoff_ms: 500
  max_backoff_ms: 30000

log:
  level: info
  format: text            # text | json
  max_bytes: 100000000
  max_files: 10

sources:
  - id: projects-dir
    kind: filesystem
    root: /srv/projects
    subdirectories: [brief, drawings, estimates, photos]

  # - id: finmap
  #   kind: api_key
  #   base_url: https://api.finmap.online/
  #   api_key: { env: FINMAP_API_KEY }
  #   list_path: v2/projects
  #   create_path: v2/projects

  # - id: worksection
  #   kind: signed_api
  #   base_url: https://example.worksection.com
  #   secret: { env: WORKSECTION_SECRET }
  #   members:
  #     user_from: manager@example.com
  #     user_to: manager@example.com
  #     manager: manager@example.com
  #   default_task:
  #     title: "{code} assembly"
  #     subtask_columns: [Estimate, Annex]

  # - id: sheet
  #   kind: spreadsheet
  #   spreadsheet_id: 1AbC...
  #   range: Projects!A:N
  #   access_token: { env: SHEETS_TOKEN }
  #   # or a refresh token, exchanged for access tokens as they expire:
  #   # oauth:
  #   #   client_id: { env: SHEETS_CLIENT_ID }
  #   #   client_secret: { env: SHEETS_CLIENT_SECRET }
  #   #   refresh_token: { env: SHEETS_REFRESH_TOKEN }
  #   columns:
  #     Project: identity
  #     Task link: ignore
"#;

/// Write [`TEMPLATE`] to `<home>/.projsync/config.yaml` unless a config exists.
pub fn write_template_at(home: &Path) -> Result<(PathBuf, bool), ConfigError> {
    write_template_to(&config_path_at(home))
}

/// Write [`TEMPLATE`] to `path` unless a file is already there.
///
/// Returns the path and whether a file was written. Write flow: `.tmp`
/// sibling → `chmod 0600` → `rename`. A missing parent is created `0700`.
pub fn write_template_to(path: &Path) -> Result<(PathBuf, bool), ConfigError> {
    if path.exists() {
        return Ok((path.to_path_buf(), false));
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
            set_dir_permissions(dir)?;
        }
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, TEMPLATE).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok((path.to_path_buf(), true))
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_max_bytes() -> u64 {
    100_000_000
}
fn default_log_max_files() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_subdirectories() -> Vec<String> {
    ["brief", "drawings", "estimates", "photos"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
fn default_api_key_header() -> String {
    "apiKey".to_string()
}
fn default_projects_path() -> String {
    "v2/projects".to_string()
}
fn default_label_field() -> String {
    "label".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_signed_api_path() -> String {
    "/api/admin/v2/".to_string()
}
fn default_list_action() -> String {
    "get_projects".to_string()
}
fn default_create_action() -> String {
    "post_project".to_string()
}
fn default_status_filter() -> Option<String> {
    Some("active".to_string())
}
fn default_task_title() -> String {
    "{code}".to_string()
}
fn default_task_action() -> String {
    "post_task".to_string()
}
fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}
fn default_oauth_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
