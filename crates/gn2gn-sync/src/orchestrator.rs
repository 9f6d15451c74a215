//! Sync orchestrator
//!
//! Drives the fetch → map → write loop for every enabled source and turns
//! whatever happens into a [`RunReport`]. A source that fails is reported
//! and left behind; the others keep going.

use crate::config::{RunMode, SourceDescriptor, SyncSettings};
use crate::destination::{Batch, Destination};
use crate::error::{ExportError, SyncError};
use crate::export::ExportConnector;
use crate::mapper::RecordMapper;
use crate::report::{RunReport, SourceFailure, SourceReport};
use crate::types::{Cursor, FetchOutcome, MappedRow, RawRecord, SkippedRecord, SourceState};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Local state of one source's sync
struct SourceRun<'a> {
    source: &'a SourceDescriptor,
    deadline: Option<Instant>,
    report: SourceReport,
}

impl<'a> SourceRun<'a> {
    fn new(source: &'a SourceDescriptor, deadline: Option<Instant>) -> Self {
        Self {
            source,
            deadline,
            report: SourceReport::pending(&source.name),
        }
    }

    fn transition(&mut self, next: SourceState) {
        let current = self.report.state;
        debug_assert!(
            current.can_transition_to(next),
            "illegal source transition {current} -> {next}"
        );
        trace!(from = %current, to = %next, "Source state");
        self.report.state = next;
    }

    fn fail(&mut self, err: &SyncError) {
        self.transition(SourceState::Failed);
        self.report.failure = Some(SourceFailure {
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

pub struct SyncOrchestrator<C, D> {
    sources: Arc<[SourceDescriptor]>,
    settings: SyncSettings,
    mapper: RecordMapper,
    connector: C,
    destination: D,
    cancel: CancellationToken,
}

impl<C, D> SyncOrchestrator<C, D>
where
    C: ExportConnector,
    D: Destination,
{
    pub fn new(
        sources: impl Into<Arc<[SourceDescriptor]>>,
        settings: SyncSettings,
        mapper: RecordMapper,
        connector: C,
        destination: D,
    ) -> Self {
        Self {
            sources: sources.into(),
            settings,
            mapper,
            connector,
            destination,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop sources at their next batch boundary once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Sync every enabled source once. Never fails as a whole: per-source
    /// failures end up in the report.
    pub async fn run_once(&self) -> RunReport {
        let started_at = Utc::now();
        let enabled: Vec<&SourceDescriptor> = self.sources.iter().filter(|s| s.enabled).collect();
        let disabled = self.sources.len() - enabled.len();

        info!(
            sources = enabled.len(),
            disabled,
            mode = self.settings.mode.as_str(),
            concurrency = self.settings.concurrency,
            "Starting sync run"
        );

        // `buffered` keeps results in configuration order
        let sources: Vec<SourceReport> = stream::iter(enabled)
            .map(|source| self.sync_source(source))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            sources,
        };

        info!(
            done = report.sources.len() - report.failed().count(),
            failed = report.failed().count(),
            rows = report.total_rows(),
            skipped = report.total_skipped(),
            "Sync run finished"
        );
        report
    }

    async fn sync_source(&self, source: &SourceDescriptor) -> SourceReport {
        let span = info_span!("sync_source", source = %source.name, export_id = source.export_id);

        async move {
            let started = Instant::now();
            let deadline = self.settings.source_timeout.map(|t| started + t);
            let mut run = SourceRun::new(source, deadline);

            if let Err(err) = self.drive(&mut run).await {
                error!(
                    kind = %err.kind(),
                    error = %err,
                    rows_written = run.report.rows_written,
                    "Source sync failed, continuing with remaining sources"
                );
                run.fail(&err);
            }

            run.report.elapsed = started.elapsed();
            if run.report.is_done() {
                info!(
                    pages = run.report.pages,
                    rows = run.report.rows_written,
                    skipped = run.report.skipped.len(),
                    watermark = ?run.report.watermark.map(Cursor::position),
                    elapsed_ms = run.report.elapsed.as_millis() as u64,
                    "Source sync done"
                );
            }
            run.report
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, run: &mut SourceRun<'_>) -> Result<(), SyncError> {
        let source = run.source;
        self.check_interrupt(run.deadline)?;

        let stored = self.destination.load_watermark(&source.name).await?;
        run.report.watermark = stored.map(|w| w.cursor);

        let mut cursor = match self.settings.mode {
            RunMode::Full => None,
            RunMode::Incremental => run.report.watermark,
        };
        debug!(start = ?cursor.map(Cursor::position), "Resolved start position");

        let mut client = self.connector.connect(source)?;

        run.transition(SourceState::Fetching);
        self.bounded(run.deadline, client.authenticate()).await?;

        loop {
            let page = match self.bounded(run.deadline, client.fetch_page(cursor)).await? {
                FetchOutcome::EndOfStream => {
                    run.transition(SourceState::Done);
                    return Ok(());
                },
                FetchOutcome::Page(page) => page,
            };

            let floor = cursor.unwrap_or(Cursor::START);
            if page.next <= floor {
                return Err(ExportError::Protocol(format!(
                    "continuation cursor {} does not advance past {floor}",
                    page.next
                ))
                .into());
            }

            run.transition(SourceState::Mapping);
            let (rows, skipped) = self.map_page(&source.name, page.records);

            run.transition(SourceState::Writing);
            let batch = Batch {
                source: source.name.clone(),
                export_id: source.export_id,
                skipped: skipped.len(),
                rows,
                watermark: page.next,
            };
            let committed = self.destination.write_batch(&batch).await?;

            run.transition(SourceState::Advancing);
            run.report.pages += 1;
            run.report.rows_written += committed.rows_written as u64;
            run.report.skipped.extend(skipped);
            run.report.watermark = Some(committed.watermark);
            cursor = Some(page.next);

            info!(
                page = run.report.pages,
                rows = committed.rows_written,
                skipped = batch.skipped,
                cursor = %page.next,
                total = ?page.total,
                "Page committed"
            );

            self.check_interrupt(run.deadline)?;
            run.transition(SourceState::Fetching);
        }
    }

    fn map_page(&self, source: &str, records: Vec<RawRecord>) -> (Vec<MappedRow>, Vec<SkippedRecord>) {
        let mut rows = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();

        for raw in records {
            match self.mapper.map(source, &raw) {
                Ok(row) => rows.push(row),
                Err(err) => {
                    let natural_key = self.mapper.natural_key_hint(&raw);
                    warn!(natural_key = ?natural_key, error = %err, "Skipping record");
                    skipped.push(SkippedRecord {
                        natural_key,
                        reason: err.to_string(),
                    });
                },
            }
        }

        (rows, skipped)
    }

    /// Between batches: stop on cancellation or an expired source budget
    fn check_interrupt(&self, deadline: Option<Instant>) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    fn timeout_error(&self) -> SyncError {
        SyncError::Timeout(self.settings.source_timeout.unwrap_or_default())
    }

    /// Run an export call under the source deadline and the run's
    /// cancellation token. Writes never go through here, so a commit in
    /// flight is always allowed to finish.
    async fn bounded<T, F>(&self, deadline: Option<Instant>, call: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, ExportError>>,
    {
        let timed = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, call)
                    .await
                    .map_err(|_| self.timeout_error())?
                    .map_err(SyncError::from),
                None => call.await.map_err(SyncError::from),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            result = timed => result,
        }
    }
}
