//! Core types shared by the export, mapping and destination layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Raw exported record, as returned by the source (a JSON object)
pub type RawRecord = serde_json::Value;

/// Position in one source's export stream.
///
/// For GeoNature exports this is the number of records consumed since the
/// start of the export. Cursors of different sources are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    pub const START: Cursor = Cursor(0);

    pub fn new(position: u64) -> Self {
        Self(position)
    }

    pub fn position(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Persisted per-source cursor (maps to `increment_log`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub source: String,
    pub cursor: Cursor,
    pub updated_at: DateTime<Utc>,
}

/// One fetched batch: records in export order plus where to continue
#[derive(Debug, Clone)]
pub struct ExportPage {
    pub records: Vec<RawRecord>,
    pub next: Cursor,
    /// Total records the source reports for this export, when it says so
    pub total: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Page(ExportPage),
    EndOfStream,
}

/// A record converted to the destination representation.
///
/// Identity is `(source, natural_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRow {
    pub source: String,
    pub natural_key: String,
    pub uuid: Option<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Mapped fields only, keyed by destination name
    pub item: serde_json::Map<String, serde_json::Value>,
}

/// A record dropped by the mapper, kept for the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub natural_key: Option<String>,
    pub reason: String,
}

/// Per-source sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Pending,
    Fetching,
    Mapping,
    Writing,
    Advancing,
    Done,
    Failed,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::Pending => "pending",
            SourceState::Fetching => "fetching",
            SourceState::Mapping => "mapping",
            SourceState::Writing => "writing",
            SourceState::Advancing => "advancing",
            SourceState::Done => "done",
            SourceState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceState::Done | SourceState::Failed)
    }

    /// Whether the sync loop may move from `self` to `next`.
    ///
    /// Mapping never fails a source (bad records are skipped), so there is
    /// no `Mapping -> Failed` edge.
    pub fn can_transition_to(&self, next: SourceState) -> bool {
        use SourceState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Failed)
                | (Fetching, Mapping)
                | (Fetching, Done)
                | (Fetching, Failed)
                | (Mapping, Writing)
                | (Writing, Advancing)
                | (Writing, Failed)
                | (Advancing, Fetching)
                | (Advancing, Failed)
        )
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
