//! Filesystem source: one directory per project under a root.
//!
//! Listing returns the names of sub-directories of `root` (regular files and
//! dot-entries are ignored). Creating an identity materializes
//! `<root>/<identity>/` plus the configured sub-directories, in order.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use projsync_core::config::FilesystemSource;
use projsync_core::{Attributes, IdentitySet, ProjectIdentity, SourceId, SourceRead};

use crate::error::{io_err, AdapterError};
use crate::SourceAdapter;

/// What [`FilesystemAdapter::materialize_structure`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub path: PathBuf,
    /// `false` when the project directory was already there.
    pub created: bool,
    /// Sub-directories created by this call (pre-existing ones are omitted).
    pub subdirectories_created: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FilesystemAdapter {
    id: SourceId,
    root: PathBuf,
    subdirectories: Vec<String>,
    create_root: bool,
}

impl FilesystemAdapter {
    pub fn new(id: SourceId, root: impl Into<PathBuf>, subdirectories: Vec<String>) -> Self {
        Self {
            id,
            root: root.into(),
            subdirectories,
            create_root: true,
        }
    }

    pub fn from_config(config: &FilesystemSource) -> Self {
        Self {
            id: config.id.clone(),
            root: config.root.clone(),
            subdirectories: config.subdirectories.clone(),
            create_root: config.create_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of all project directories under the root. Hidden (dot-leading)
    /// entries are not projects.
    ///
    /// A missing root is an error, not an empty listing: the tree may simply
    /// not be mounted.
    pub fn scan(&self) -> Result<IdentitySet, AdapterError> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_err(&self.root, e))?;
        let mut identities = IdentitySet::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.root, e))?;
            // Follows symlinks, like `ensure_dir`; a dangling link is skipped.
            if !entry.path().is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if name.starts_with('.') => {}
                Ok(name) => {
                    identities.insert(ProjectIdentity::from(name));
                }
                Err(raw) => {
                    tracing::warn!(
                        source = %self.id,
                        name = ?raw,
                        "skipping directory with non UTF-8 name",
                    );
                }
            }
        }
        Ok(identities)
    }

    /// Create `<root>/<identity>/` and every configured sub-directory.
    ///
    /// Existing directories are accepted. A path that exists but is not a
    /// directory yields [`AdapterError::NotADirectory`]; sub-directories after
    /// the conflicting one are not attempted.
    pub fn materialize_structure(
        &self,
        identity: &ProjectIdentity,
    ) -> Result<Materialized, AdapterError> {
        validate_identity(identity)?;
        let path = self.root.join(identity.as_str());
        let created = ensure_dir(&path)?;

        let mut subdirectories_created = Vec::new();
        for name in &self.subdirectories {
            if ensure_dir(&path.join(name))? {
                subdirectories_created.push(name.clone());
            }
        }

        Ok(Materialized {
            path,
            created,
            subdirectories_created,
        })
    }
}

impl SourceAdapter for FilesystemAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn list_identities(&self) -> SourceRead {
        match self.scan() {
            Ok(identities) => SourceRead::available(identities),
            Err(err) => {
                tracing::warn!(source = %self.id, error = %err, "project directory scan failed");
                SourceRead::unavailable()
            }
        }
    }

    fn create_identity(&self, identity: &ProjectIdentity, _attributes: &Attributes) -> bool {
        match self.materialize_structure(identity) {
            Ok(done) => {
                tracing::debug!(
                    source = %self.id,
                    identity = %identity,
                    path = %done.path.display(),
                    created = done.created,
                    subdirectories = ?done.subdirectories_created,
                    "project directory materialized",
                );
                true
            }
            Err(err @ AdapterError::NotADirectory { .. }) => {
                tracing::error!(
                    source = %self.id,
                    identity = %identity,
                    error = %err,
                    "filesystem conflict, leaving path untouched",
                );
                false
            }
            Err(err) => {
                tracing::error!(
                    source = %self.id,
                    identity = %identity,
                    error = %err,
                    "failed to create project directory",
                );
                false
            }
        }
    }

    fn prepare(&self) -> Result<(), AdapterError> {
        if self.create_root && !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))?;
            tracing::info!(source = %self.id, root = %self.root.display(), "created project root");
        }
        Ok(())
    }
}

/// Returns `true` if the directory was created, `false` if it already existed.
fn ensure_dir(path: &Path) -> Result<bool, AdapterError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(false),
        Ok(_) => {
            return Err(AdapterError::NotADirectory {
                path: path.to_path_buf(),
            })
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(path, err)),
    }

    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        // Lost a race with another writer; re-check what is there now.
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            if path.is_dir() {
                Ok(false)
            } else {
                Err(AdapterError::NotADirectory {
                    path: path.to_path_buf(),
                })
            }
        }
        Err(err) => Err(io_err(path, err)),
    }
}

fn validate_identity(identity: &ProjectIdentity) -> Result<(), AdapterError> {
    let name = identity.as_str();
    let reason = if name.is_empty() {
        Some("empty name")
    } else if name == "." || name == ".." {
        Some("relative path component")
    } else if name.starts_with('.') {
        Some("hidden name, never listed back")
    } else if name.contains('/') || name.contains('\\') {
        Some("contains a path separator")
    } else if name.contains('\0') {
        Some("contains a NUL byte")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(AdapterError::InvalidIdentity {
            identity: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
