//! Error types shared across GN2GN crates

use thiserror::Error;

/// Result type alias for GN2GN process-level operations
pub type Result<T> = std::result::Result<T, Gn2GnError>;

/// Process-level error type.
///
/// The sync engine has its own per-layer errors; this one covers what
/// happens around a run, such as reading files and parsing configuration.
#[derive(Error, Debug)]
pub enum Gn2GnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Gn2GnError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
