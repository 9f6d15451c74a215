//! `gn2gn init` command implementation

use crate::config::SAMPLE_CONFIG;
use crate::error::{CliError, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Write [`SAMPLE_CONFIG`] to `path`
pub fn run(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(CliError::AlreadyInitialized(path.display().to_string()));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, SAMPLE_CONFIG)?;

    info!(path = %path.display(), "Wrote sample configuration");
    println!("Sample configuration written to {}", path.display());
    println!("Edit the [db] and [[source]] sections, then run 'gn2gn db-init {}'.", path.display());
    Ok(())
}
