//! Error types for the gn2gn CLI
//!
//! Messages are user-facing: they say what failed and what to check.

use gn2gn_common::Gn2GnError;
use gn2gn_sync::WriteError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file missing, unreadable or invalid
    #[error("{0}. Check the configuration file (create one with 'gn2gn init <file>').")]
    Config(#[from] Gn2GnError),

    /// Could not reach or query the destination database
    #[error("Database error: {0}. Check the [db] section and that PostgreSQL is reachable.")]
    Database(#[from] sqlx::Error),

    /// Destination schema operation failed
    #[error("Destination error: {0}. Run 'gn2gn db-init <file>' if the schema is missing.")]
    Destination(#[from] WriteError),

    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    #[error("Failed to render report: {0}")]
    Json(#[from] serde_json::Error),

    /// Target file exists and `--force` was not given
    #[error("{0} already exists. Use --force to overwrite.")]
    AlreadyInitialized(String),
}
