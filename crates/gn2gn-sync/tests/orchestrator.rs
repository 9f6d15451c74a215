//! Orchestrator behaviour against scripted sources and the in-memory
//! destination.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{broken_synthese, mapper, records, settings, source, synthese, FakeConnector, Script};
use gn2gn_sync::{
    Cursor, Destination, FailureKind, MemoryDestination, RunMode, SourceState, SyncOrchestrator,
    SyncSettings,
};
use serde_json::json;
use std::sync::atomic::AtomicU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn orchestrator(
    names: &[&str],
    settings: SyncSettings,
    connector: FakeConnector,
) -> SyncOrchestrator<FakeConnector, MemoryDestination> {
    let sources: Vec<_> = names.iter().map(|n| source(n)).collect();
    SyncOrchestrator::new(sources, settings, mapper(), connector, MemoryDestination::new())
}

#[tokio::test]
async fn test_two_sources_end_to_end() {
    let connector = FakeConnector::new()
        .with("a", Script::new(records(1..=4), 2))
        .with("b", Script::new(records(101..=104), 2));
    let orch = orchestrator(&["a", "b"], settings(), connector.clone());

    let report = orch.run_once().await;

    assert!(!report.has_failures());
    assert_eq!(report.sources.len(), 2);
    for name in ["a", "b"] {
        let src = report.source(name).unwrap();
        assert_eq!(src.state, SourceState::Done);
        assert_eq!(src.pages, 2);
        assert_eq!(src.rows_written, 4);
        assert_eq!(src.watermark, Some(Cursor::new(4)));
        assert_eq!(orch.destination().rows_for(name).await.len(), 4);
    }
    assert_eq!(report.total_rows(), 8);

    // two pages, then one call that hits the end
    assert_eq!(
        connector.script("a").fetched(),
        vec![None, Some(Cursor::new(2)), Some(Cursor::new(4))]
    );
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let connector = FakeConnector::new().with("a", Script::new(records(1..=5), 2));
    let full = SyncSettings { mode: RunMode::Full, ..settings() };
    let orch = orchestrator(&["a"], full, connector);

    let first = orch.run_once().await;
    let rows_after_first = orch.destination().rows().await;
    let second = orch.run_once().await;

    assert_eq!(first.total_rows(), 5);
    assert_eq!(second.total_rows(), 5);
    assert_eq!(orch.destination().rows().await, rows_after_first);
    assert_eq!(second.source("a").unwrap().watermark, Some(Cursor::new(5)));
}

#[tokio::test]
async fn test_incremental_resumes_from_stored_watermark() {
    let connector = FakeConnector::new().with("a", Script::new(records(1..=10), 2));
    let orch = orchestrator(&["a"], settings(), connector.clone());
    orch.destination().set_watermark("a", Cursor::new(6)).await;

    let report = orch.run_once().await;

    let src = report.source("a").unwrap();
    assert_eq!(src.state, SourceState::Done);
    assert_eq!(src.rows_written, 4);
    assert_eq!(src.watermark, Some(Cursor::new(10)));
    assert_eq!(connector.script("a").fetched()[0], Some(Cursor::new(6)));

    let keys: Vec<String> =
        orch.destination().rows().await.into_iter().map(|r| r.natural_key).collect();
    assert_eq!(keys, vec!["10", "7", "8", "9"]);
}

#[tokio::test]
async fn test_incremental_rerun_fetches_nothing_new() {
    let connector = FakeConnector::new().with("a", Script::new(records(1..=3), 2));
    let orch = orchestrator(&["a"], settings(), connector.clone());

    orch.run_once().await;
    let again = orch.run_once().await;

    let src = again.source("a").unwrap();
    assert!(src.is_done());
    assert_eq!(src.rows_written, 0);
    assert_eq!(src.pages, 0);
    assert_eq!(src.watermark, Some(Cursor::new(3)));
    assert_eq!(connector.script("a").fetched().last(), Some(&Some(Cursor::new(3))));
}

#[tokio::test]
async fn test_full_run_never_lowers_watermark() {
    let connector = FakeConnector::new().with("a", Script::new(records(1..=4), 2));
    let full = SyncSettings { mode: RunMode::Full, ..settings() };
    let orch = orchestrator(&["a"], full, connector.clone());
    orch.destination().set_watermark("a", Cursor::new(20)).await;

    let report = orch.run_once().await;

    assert_eq!(connector.script("a").fetched()[0], None);
    assert_eq!(report.source("a").unwrap().rows_written, 4);
    let stored = orch.destination().load_watermark("a").await.unwrap().unwrap();
    assert_eq!(stored.cursor, Cursor::new(20));
}

#[tokio::test]
async fn test_bad_record_is_skipped_not_fatal() {
    let mut page: Vec<_> = records(1..=10);
    page[4] = broken_synthese(5);
    let connector = FakeConnector::new().with("a", Script::new(page, 10));
    let orch = orchestrator(&["a"], settings(), connector);

    let report = orch.run_once().await;

    let src = report.source("a").unwrap();
    assert_eq!(src.state, SourceState::Done);
    assert_eq!(src.rows_written, 9);
    assert_eq!(src.skipped.len(), 1);
    assert_eq!(src.skipped[0].natural_key.as_deref(), Some("5"));
    assert!(src.skipped[0].reason.contains("cd_nom"));
    assert_eq!(src.watermark, Some(Cursor::new(10)));

    let log = orch.destination().download_log().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].rows_skipped, 1);
}

#[tokio::test]
async fn test_nul_character_skips_only_its_record() {
    let mut page = records(1..=4);
    page[1]["observateurs"] = json!("Dupont\u{0}J.");
    page[2]["geometry"] = json!({"type": "Point", "properties": {"label": "a\u{0}"}});
    let connector = FakeConnector::new().with("a", Script::new(page, 4));
    let orch = orchestrator(&["a"], settings(), connector);

    let report = orch.run_once().await;

    let src = report.source("a").unwrap();
    assert_eq!(src.state, SourceState::Done);
    assert_eq!(src.rows_written, 2);
    let skipped: Vec<_> = src.skipped.iter().filter_map(|s| s.natural_key.as_deref()).collect();
    assert_eq!(skipped, ["2", "3"]);
    assert!(src.skipped[0].reason.contains("observateurs"));
    assert!(src.skipped[1].reason.contains("geometry"));
    assert_eq!(src.watermark, Some(Cursor::new(4)));
}

#[tokio::test]
async fn test_failed_write_commits_nothing() {
    let connector = FakeConnector::new().with("a", Script::new(records(1..=4), 4));
    let orch = orchestrator(&["a"], settings(), connector);
    orch.destination().fail_writes(1, 2).await;

    let report = orch.run_once().await;

    let src = report.source("a").unwrap();
    assert_eq!(src.state, SourceState::Failed);
    assert_eq!(src.failure.as_ref().unwrap().kind, FailureKind::Write);
    assert_eq!(src.rows_written, 0);
    assert!(orch.destination().rows().await.is_empty());
    assert!(orch.destination().load_watermark("a").await.unwrap().is_none());

    // the next run picks the whole page up again
    let retry = orch.run_once().await;
    assert!(retry.source("a").unwrap().is_done());
    assert_eq!(orch.destination().rows().await.len(), 4);
}

#[tokio::test]
async fn test_failing_source_does_not_stop_others() {
    let rejected = Script {
        reject_login: true,
        ..Script::new(records(1..=2), 2)
    };
    let connector = FakeConnector::new()
        .with("a", Script::new(records(1..=2), 2))
        .with("b", rejected)
        .with("c", Script::new(records(1..=3), 2));
    let orch = orchestrator(&["a", "b", "c"], settings(), connector.clone());

    let report = orch.run_once().await;

    let states: Vec<_> = report.sources.iter().map(|s| (s.source.as_str(), s.state)).collect();
    assert_eq!(
        states,
        vec![("a", SourceState::Done), ("b", SourceState::Failed), ("c", SourceState::Done)]
    );
    let failure = report.source("b").unwrap().failure.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Auth);
    assert!(failure.message.contains("490"));
    assert!(connector.script("b").fetched().is_empty());
    assert_eq!(orch.destination().rows_for("c").await.len(), 3);
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_transient_fetch_failure_fails_source_until_next_run() {
    let flaky = Script {
        transient_failures: AtomicU32::new(1),
        ..Script::new(records(1..=2), 2)
    };
    let connector = FakeConnector::new().with("a", flaky);
    let orch = orchestrator(&["a"], settings(), connector);

    let first = orch.run_once().await;
    assert_eq!(first.sources[0].failure.as_ref().unwrap().kind, FailureKind::Transient);

    let second = orch.run_once().await;
    assert!(second.sources[0].is_done());
    assert_eq!(second.total_rows(), 2);
}

#[tokio::test]
async fn test_cursor_that_does_not_advance_is_a_protocol_error() {
    let stuck = Script {
        stuck: true,
        ..Script::new(vec![synthese(1)], 2)
    };
    let connector = FakeConnector::new().with("a", stuck);
    let orch = orchestrator(&["a"], settings(), connector);

    let report = orch.run_once().await;

    let src = report.source("a").unwrap();
    assert_eq!(src.state, SourceState::Failed);
    assert_eq!(src.failure.as_ref().unwrap().kind, FailureKind::Protocol);
    assert!(orch.destination().rows().await.is_empty());
}

#[tokio::test]
async fn test_disabled_source_is_left_out() {
    let connector = FakeConnector::new().with("a", Script::new(records(1..=2), 2));
    let mut off = source("off");
    off.enabled = false;
    let orch = SyncOrchestrator::new(
        vec![source("a"), off],
        settings(),
        mapper(),
        connector,
        MemoryDestination::new(),
    );

    let report = orch.run_once().await;

    assert_eq!(report.sources.len(), 1);
    assert!(report.source("off").is_none());
}

#[tokio::test]
async fn test_unknown_connector_source_fails_alone() {
    let connector = FakeConnector::new().with("a", Script::new(records(1..=2), 2));
    let orch = orchestrator(&["ghost", "a"], settings(), connector);

    let report = orch.run_once().await;

    assert_eq!(report.sources[0].state, SourceState::Failed);
    assert_eq!(report.sources[0].failure.as_ref().unwrap().kind, FailureKind::Protocol);
    assert!(report.sources[1].is_done());
}

#[tokio::test(start_paused = true)]
async fn test_source_timeout_keeps_committed_pages() {
    let slow = Script {
        delay: Some(Duration::from_secs(1)),
        ..Script::new(records(1..=10), 2)
    };
    let connector = FakeConnector::new().with("a", slow);
    let timed = SyncSettings {
        source_timeout: Some(Duration::from_millis(2500)),
        ..settings()
    };
    let orch = orchestrator(&["a"], timed, connector);

    let report = orch.run_once().await;

    let src = report.source("a").unwrap();
    assert_eq!(src.state, SourceState::Failed);
    assert_eq!(src.failure.as_ref().unwrap().kind, FailureKind::Timeout);
    assert_eq!(src.rows_written, 4);
    assert_eq!(src.watermark, Some(Cursor::new(4)));
    assert_eq!(orch.destination().rows().await.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_between_batches() {
    let slow = Script {
        delay: Some(Duration::from_secs(1)),
        ..Script::new(records(1..=10), 2)
    };
    let connector = FakeConnector::new().with("a", slow);
    let token = CancellationToken::new();
    let orch = orchestrator(&["a"], settings(), connector).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        token.cancel();
    });
    let report = orch.run_once().await;
    canceller.await.unwrap();

    let src = report.source("a").unwrap();
    assert_eq!(src.failure.as_ref().unwrap().kind, FailureKind::Cancelled);
    assert_eq!(src.rows_written, 4);
    let stored = orch.destination().load_watermark("a").await.unwrap().unwrap();
    assert_eq!(stored.cursor, Cursor::new(4));
}

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let connector = FakeConnector::new()
        .with("a", Script::new(records(1..=2), 2))
        .with("b", Script::new(records(1..=2), 2));
    let token = CancellationToken::new();
    token.cancel();
    let orch = orchestrator(&["a", "b"], settings(), connector.clone()).with_cancellation(token);

    let report = orch.run_once().await;

    assert_eq!(report.failed().count(), 2);
    assert!(report
        .sources
        .iter()
        .all(|s| s.failure.as_ref().unwrap().kind == FailureKind::Cancelled));
    assert!(connector.script("a").fetched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sources_report_in_config_order() {
    let slow = Script {
        delay: Some(Duration::from_secs(5)),
        ..Script::new(records(1..=2), 2)
    };
    let connector = FakeConnector::new()
        .with("slow", slow)
        .with("fast1", Script::new(records(1..=2), 2))
        .with("fast2", Script::new(records(1..=2), 2));
    let parallel = SyncSettings { concurrency: 3, ..settings() };
    let orch = orchestrator(&["slow", "fast1", "fast2"], parallel, connector);

    let started = tokio::time::Instant::now();
    let report = orch.run_once().await;

    let names: Vec<_> = report.sources.iter().map(|s| s.source.as_str()).collect();
    assert_eq!(names, vec!["slow", "fast1", "fast2"]);
    assert!(!report.has_failures());
    // two 5s fetches for the slow source; the others ran alongside it
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
}
