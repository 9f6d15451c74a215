//! Command implementations

pub mod db_init;
pub mod init;
pub mod status;
pub mod sync;

use crate::config::SyncConfig;
use crate::error::Result;
use gn2gn_sync::PgDestination;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::debug;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Open a pool on the configured database
pub(crate) async fn connect(config: &SyncConfig) -> Result<PgDestination> {
    let options = config.destination.connect_options()?;
    // one connection per concurrent source, plus one for watermark reads
    let max_connections = u32::try_from(config.tuning.concurrency)
        .unwrap_or(u32::MAX)
        .saturating_add(1);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;
    debug!(max_connections, "Connected to destination database");

    let destination = PgDestination::new(
        pool,
        &config.destination.db_schema_import,
        config.tuning.write_retry.clone(),
    )?;
    Ok(destination)
}
