//! `projsync init`

use std::path::Path;

use anyhow::{Context, Result};

use projsync_core::config;

pub fn run(config_path: &Path) -> Result<()> {
    let (path, written) = config::write_template_to(config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    if written {
        println!("✓ Wrote configuration template to {}", path.display());
        println!("  Edit the sources, then run `projsync check`.");
    } else {
        println!("Configuration already exists at {}", path.display());
    }
    Ok(())
}
