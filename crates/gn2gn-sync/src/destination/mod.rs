//! Destination writer
//!
//! A [`Destination`] commits one page of mapped rows together with the
//! source's new watermark, atomically: either every row and the watermark
//! become visible, or nothing does.

mod memory;
mod postgres;

pub use memory::{DownloadLogEntry, MemoryDestination};
pub use postgres::PgDestination;

use crate::error::WriteError;
use crate::types::{Cursor, MappedRow, Watermark};
use async_trait::async_trait;
use std::collections::HashMap;

/// One page worth of work for the writer
#[derive(Debug, Clone)]
pub struct Batch {
    pub source: String,
    pub export_id: u32,
    pub rows: Vec<MappedRow>,
    /// Records of the page the mapper rejected
    pub skipped: usize,
    /// Continuation cursor of the page
    pub watermark: Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    pub rows_written: usize,
    /// Stored watermark after the commit (never lower than before)
    pub watermark: Cursor,
}

#[async_trait]
pub trait Destination: Send + Sync {
    async fn load_watermark(&self, source: &str) -> Result<Option<Watermark>, WriteError>;

    /// Every stored watermark, ordered by source name
    async fn watermarks(&self) -> Result<Vec<Watermark>, WriteError>;

    /// Upsert the rows and persist the watermark in one transaction.
    ///
    /// Retryable failures are retried by the implementation's policy before
    /// this returns.
    async fn write_batch(&self, batch: &Batch) -> Result<Committed, WriteError>;
}

/// Rows to write, one per natural key, keeping the last occurrence.
///
/// An upsert statement may not touch the same key twice.
pub(crate) fn dedupe_rows(batch: &Batch) -> Result<Vec<&MappedRow>, WriteError> {
    let mut last_seen: HashMap<&str, usize> = HashMap::with_capacity(batch.rows.len());
    for (index, row) in batch.rows.iter().enumerate() {
        if row.source != batch.source {
            return Err(WriteError::Invalid(format!(
                "row '{}' belongs to source '{}', batch is for '{}'",
                row.natural_key, row.source, batch.source
            )));
        }
        last_seen.insert(row.natural_key.as_str(), index);
    }

    Ok(batch
        .rows
        .iter()
        .enumerate()
        .filter(|(index, row)| last_seen.get(row.natural_key.as_str()) == Some(index))
        .map(|(_, row)| row)
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn row(source: &str, key: &str, value: i64) -> MappedRow {
        let mut item = Map::new();
        item.insert("value".into(), json!(value));
        MappedRow {
            source: source.into(),
            natural_key: key.into(),
            uuid: None,
            updated_at: None,
            item,
        }
    }

    fn batch(rows: Vec<MappedRow>) -> Batch {
        Batch {
            source: "a".into(),
            export_id: 1,
            rows,
            skipped: 0,
            watermark: Cursor::new(3),
        }
    }

    #[test]
    fn test_dedupe_keeps_last_occurrence() {
        let b = batch(vec![row("a", "1", 1), row("a", "2", 2), row("a", "1", 3)]);
        let rows = dedupe_rows(&b).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].natural_key, "2");
        assert_eq!(rows[1].natural_key, "1");
        assert_eq!(rows[1].item["value"], json!(3));
    }

    #[test]
    fn test_foreign_row_rejected() {
        let b = batch(vec![row("a", "1", 1), row("b", "2", 2)]);
        assert!(matches!(dedupe_rows(&b), Err(WriteError::Invalid(_))));
    }
}
