//! `gn2gn status` command implementation

use super::connect;
use crate::config::SyncConfig;
use crate::error::Result;
use gn2gn_sync::{Destination, SourceDescriptor, Watermark};
use std::fmt::Write;
use std::path::Path;

pub async fn run(path: &Path) -> Result<()> {
    let config = SyncConfig::load(path)?;
    let destination = connect(&config).await?;

    let watermarks = destination.watermarks().await?;
    print!("{}", format_status(&config.sources, &watermarks));
    Ok(())
}

/// One line per configured source, then stored watermarks whose source is
/// no longer configured.
pub fn format_status(sources: &[SourceDescriptor], watermarks: &[Watermark]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:<9} {:>10}  {}",
        "SOURCE", "ENABLED", "WATERMARK", "UPDATED"
    );

    for source in sources {
        let stored = watermarks.iter().find(|w| w.source == source.name);
        let (position, updated) = match stored {
            Some(w) => (w.cursor.to_string(), w.updated_at.to_rfc3339()),
            None => ("-".to_string(), "never synced".to_string()),
        };
        let enabled = if source.enabled { "yes" } else { "no" };
        let _ = writeln!(out, "{:<24} {:<9} {:>10}  {}", source.name, enabled, position, updated);
    }

    for orphan in watermarks
        .iter()
        .filter(|w| !sources.iter().any(|s| s.name == w.source))
    {
        let _ = writeln!(
            out,
            "{:<24} {:<9} {:>10}  {}",
            orphan.source,
            "removed",
            orphan.cursor,
            orphan.updated_at.to_rfc3339()
        );
    }
    out
}
