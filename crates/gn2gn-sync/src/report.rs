//! Run report returned by [`crate::SyncOrchestrator::run_once`]

use crate::error::FailureKind;
use crate::types::{Cursor, SkippedRecord, SourceState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one source's sync
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    /// `Done` or `Failed`
    pub state: SourceState,
    pub pages: u32,
    pub rows_written: u64,
    pub skipped: Vec<SkippedRecord>,
    /// Stored watermark after the last commit, or the one found at start
    pub watermark: Option<Cursor>,
    pub failure: Option<SourceFailure>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl SourceReport {
    pub(crate) fn pending(source: &str) -> Self {
        Self {
            source: source.to_string(),
            state: SourceState::Pending,
            pages: 0,
            rows_written: 0,
            skipped: Vec::new(),
            watermark: None,
            failure: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == SourceState::Done
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per enabled source, in configuration order
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.sources.iter().any(|s| s.state == SourceState::Failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| s.state == SourceState::Failed)
    }

    pub fn source(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == name)
    }

    pub fn total_rows(&self) -> u64 {
        self.sources.iter().map(|s| s.rows_written).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.sources.iter().map(|s| s.skipped.len()).sum()
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
