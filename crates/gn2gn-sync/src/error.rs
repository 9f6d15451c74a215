//! Error taxonomy of the transfer engine
//!
//! | error          | scope   | retried | effect on the source |
//! |----------------|---------|---------|----------------------|
//! | `ExportError::Auth`      | source  | no  | FAILED |
//! | `ExportError::Transient` | request | yes | FAILED once the budget is spent |
//! | `ExportError::Protocol`  | source  | no  | FAILED |
//! | `MappingError`           | record  | no  | record skipped |
//! | `WriteError`             | batch   | yes | FAILED once the budget is spent |

use crate::retry::Retryable;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to a source's export API
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ExportError {
    /// Classify a non-success HTTP status from a data request
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        let msg = format!("{context}: HTTP {status}");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExportError::Auth(msg),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                ExportError::Transient(msg)
            },
            s if s.is_server_error() => ExportError::Transient(msg),
            _ => ExportError::Protocol(msg),
        }
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ExportError::from_status(status, "request failed");
        }
        if err.is_decode() {
            ExportError::Protocol(err.to_string())
        } else if err.is_builder() {
            ExportError::Protocol(format!("invalid request: {err}"))
        } else {
            // connect, timeout, body and redirect failures
            ExportError::Transient(err.to_string())
        }
    }
}

impl Retryable for ExportError {
    fn is_retryable(&self) -> bool {
        matches!(self, ExportError::Transient(_))
    }
}

/// Failure converting one raw record; the record is skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl MappingError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        MappingError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure committing a batch
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("destination unavailable: {0}")]
    Unavailable(String),

    #[error("invalid batch: {0}")]
    Invalid(String),
}

impl Retryable for WriteError {
    fn is_retryable(&self) -> bool {
        match self {
            WriteError::Invalid(_) => false,
            // SQLSTATE classes 22 (data exception) and 23 (integrity
            // constraint) fail the same way on every attempt
            WriteError::Database(sqlx::Error::Database(db)) => !db
                .code()
                .is_some_and(|code| code.starts_with("22") || code.starts_with("23")),
            _ => true,
        }
    }
}

/// Why a source ended in `FAILED`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    Transient,
    Protocol,
    Write,
    Timeout,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::Transient => "transient",
            FailureKind::Protocol => "protocol",
            FailureKind::Write => "write",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-fatal error reaching the orchestrator
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("source timed out after {0:?}")]
    Timeout(Duration),

    #[error("run cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Export(ExportError::Auth(_)) => FailureKind::Auth,
            SyncError::Export(ExportError::Transient(_)) => FailureKind::Transient,
            SyncError::Export(ExportError::Protocol(_)) => FailureKind::Protocol,
            SyncError::Write(_) => FailureKind::Write,
            SyncError::Timeout(_) => FailureKind::Timeout,
            SyncError::Cancelled => FailureKind::Cancelled,
        }
    }
}
