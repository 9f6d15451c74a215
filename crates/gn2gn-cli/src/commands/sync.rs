//! `gn2gn full` and `gn2gn update` command implementation

use super::connect;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::RunArgs;
use gn2gn_sync::{
    Destination, GeoNatureConnector, MemoryDestination, RecordMapper, RunMode, RunReport,
    SourceDescriptor, SyncOrchestrator, SyncSettings,
};
use std::fmt::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run one sync and print its report
pub async fn run(
    path: &Path,
    mode: RunMode,
    args: &RunArgs,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let mut config = SyncConfig::load(path)?;
    config.select_sources(&args.sources)?;

    let settings = SyncSettings {
        mode,
        ..config.tuning.clone()
    };
    let mapper = config.mapper();

    info!(
        mode = mode.as_str(),
        sources = config.sources.len(),
        dry_run = args.dry_run,
        "Starting sync"
    );

    let report = if args.dry_run {
        execute(config.sources, settings, mapper, MemoryDestination::new(), cancel).await
    } else {
        let destination = connect(&config).await?;
        destination.ensure_schema().await?;
        execute(config.sources, settings, mapper, destination, cancel).await
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_summary(&report));
    }
    Ok(report)
}

async fn execute<D: Destination>(
    sources: Vec<SourceDescriptor>,
    settings: SyncSettings,
    mapper: RecordMapper,
    destination: D,
    cancel: CancellationToken,
) -> RunReport {
    let connector = GeoNatureConnector::new(&settings);
    SyncOrchestrator::new(sources, settings, mapper, connector, destination)
        .with_cancellation(cancel)
        .run_once()
        .await
}

/// Plain-text table of a run report
pub fn format_summary(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:<8} {:>6} {:>10} {:>8} {:>10} {:>9}",
        "SOURCE", "STATE", "PAGES", "ROWS", "SKIPPED", "WATERMARK", "ELAPSED"
    );

    for source in &report.sources {
        let watermark = source
            .watermark
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = write!(
            out,
            "{:<24} {:<8} {:>6} {:>10} {:>8} {:>10} {:>8.1}s",
            source.source,
            source.state.as_str(),
            source.pages,
            source.rows_written,
            source.skipped.len(),
            watermark,
            source.elapsed.as_secs_f64()
        );
        if let Some(failure) = &source.failure {
            let _ = write!(out, "  {}: {}", failure.kind, failure.message);
        }
        out.push('\n');
    }

    let failed = report.failed().count();
    let _ = writeln!(
        out,
        "\n{} rows written, {} records skipped, {} of {} sources failed",
        report.total_rows(),
        report.total_skipped(),
        failed,
        report.sources.len()
    );
    out
}
