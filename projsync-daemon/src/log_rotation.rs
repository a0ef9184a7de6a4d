//! Size-based rotation of the daemon log file.
//!
//! When the live file reaches `max_bytes` it is shifted into a numbered
//! backup chain, newest first:
//!   projsync.log → projsync.log.1 → projsync.log.2 → … → projsync.log.<max_files>
//! and the oldest backup is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use projsync_core::config::LogConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRotation {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl LogRotation {
    pub fn new(path: impl Into<PathBuf>, config: &LogConfig) -> Self {
        Self {
            path: path.into(),
            max_bytes: config.max_bytes,
            max_files: config.max_files,
        }
    }

    /// Rotate if the live file has reached the size limit.
    ///
    /// Returns `true` if rotation occurred. A missing live file is not an
    /// error; it simply has nothing to rotate.
    pub fn rotate_if_needed(&self) -> io::Result<bool> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        if size < self.max_bytes {
            return Ok(false);
        }

        remove_if_exists(&self.backup(self.max_files))?;
        for n in (1..self.max_files).rev() {
            let from = self.backup(n);
            if from.exists() {
                fs::rename(&from, self.backup(n + 1))?;
            }
        }
        fs::rename(&self.path, self.backup(1))?;

        // Writers open the file per record in append mode, so the next record
        // recreates it; creating it here keeps `projsync logs` working between.
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(true)
    }

    /// One rotation check, with the outcome logged.
    pub fn run_once(&self) {
        match self.rotate_if_needed() {
            Ok(true) => tracing::info!(path = %self.path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "log rotation failed")
            }
        }
    }

    /// Path of the `n`-th backup, e.g. `projsync.log.2`.
    pub fn backup(&self, n: usize) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "projsync.log".into());
        name.push(format!(".{n}"));
        self.path.with_file_name(name)
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
