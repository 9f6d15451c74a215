//! `gn2gn db-init` command implementation

use super::connect;
use crate::config::SyncConfig;
use crate::error::Result;
use std::path::Path;

pub async fn run(path: &Path) -> Result<()> {
    let config = SyncConfig::load(path)?;
    let destination = connect(&config).await?;

    destination.ensure_schema().await?;

    println!("Schema '{}' is ready", destination.schema());
    Ok(())
}
