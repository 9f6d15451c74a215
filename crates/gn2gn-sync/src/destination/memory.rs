//! In-process destination
//!
//! Used by `--dry-run` and by tests. Commits are atomic the same way the
//! Postgres writer's are: rows are staged first and only applied once the
//! whole batch has been accepted.

use super::{dedupe_rows, Batch, Committed, Destination};
use crate::error::WriteError;
use crate::retry::RetryPolicy;
use crate::types::{Cursor, MappedRow, Watermark};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLogEntry {
    pub source: String,
    pub export_id: u32,
    pub watermark: Cursor,
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug)]
struct FaultPlan {
    remaining: u32,
    after_rows: usize,
}

#[derive(Debug, Default)]
struct Store {
    rows: BTreeMap<(String, String), MappedRow>,
    watermarks: BTreeMap<String, Watermark>,
    log: Vec<DownloadLogEntry>,
    faults: Option<FaultPlan>,
}

#[derive(Debug)]
pub struct MemoryDestination {
    store: Mutex<Store>,
    retry: RetryPolicy,
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::no_retry())
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            retry,
        }
    }

    /// Make the next `times` write attempts fail after staging `after_rows`
    /// rows.
    pub async fn fail_writes(&self, times: u32, after_rows: usize) {
        self.store.lock().await.faults = Some(FaultPlan {
            remaining: times,
            after_rows,
        });
    }

    pub async fn set_watermark(&self, source: &str, cursor: Cursor) {
        self.store.lock().await.watermarks.insert(
            source.to_string(),
            Watermark {
                source: source.to_string(),
                cursor,
                updated_at: Utc::now(),
            },
        );
    }

    /// Stored rows ordered by `(source, natural_key)`
    pub async fn rows(&self) -> Vec<MappedRow> {
        self.store.lock().await.rows.values().cloned().collect()
    }

    pub async fn rows_for(&self, source: &str) -> Vec<MappedRow> {
        self.store
            .lock()
            .await
            .rows
            .values()
            .filter(|r| r.source == source)
            .cloned()
            .collect()
    }

    pub async fn download_log(&self) -> Vec<DownloadLogEntry> {
        self.store.lock().await.log.clone()
    }

    async fn try_write(&self, batch: &Batch) -> Result<Committed, WriteError> {
        let rows = dedupe_rows(batch)?;
        let mut store = self.store.lock().await;

        let fault_after = match store.faults.as_mut() {
            Some(plan) if plan.remaining > 0 => {
                plan.remaining -= 1;
                Some(plan.after_rows)
            },
            _ => None,
        };

        let mut staged = Vec::with_capacity(rows.len());
        for row in &rows {
            if fault_after == Some(staged.len()) {
                break;
            }
            staged.push(((row.source.clone(), row.natural_key.clone()), (*row).clone()));
        }
        if fault_after.is_some() {
            return Err(WriteError::Unavailable(format!(
                "simulated failure after staging {} of {} rows",
                staged.len(),
                rows.len()
            )));
        }

        let rows_written = staged.len();
        store.rows.extend(staged);

        let now = Utc::now();
        let watermark = store
            .watermarks
            .entry(batch.source.clone())
            .and_modify(|w| {
                w.cursor = w.cursor.max(batch.watermark);
                w.updated_at = now;
            })
            .or_insert_with(|| Watermark {
                source: batch.source.clone(),
                cursor: batch.watermark,
                updated_at: now,
            })
            .cursor;

        store.log.push(DownloadLogEntry {
            source: batch.source.clone(),
            export_id: batch.export_id,
            watermark,
            rows_written,
            rows_skipped: batch.skipped,
            logged_at: now,
        });

        debug!(source = %batch.source, rows = rows_written, watermark = %watermark, "Batch committed in memory");
        Ok(Committed {
            rows_written,
            watermark,
        })
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn load_watermark(&self, source: &str) -> Result<Option<Watermark>, WriteError> {
        Ok(self.store.lock().await.watermarks.get(source).cloned())
    }

    async fn watermarks(&self) -> Result<Vec<Watermark>, WriteError> {
        Ok(self.store.lock().await.watermarks.values().cloned().collect())
    }

    async fn write_batch(&self, batch: &Batch) -> Result<Committed, WriteError> {
        self.retry.run("write_batch", |_| self.try_write(batch)).await
    }
}
