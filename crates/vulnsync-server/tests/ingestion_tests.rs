//! End-to-end ingestion runs against scripted upstreams
//!
//! Time is paused, so retry budgets elapse instantly and deterministically.

mod common;

use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;

use common::{
    ingester_config, record, FeedFailure, Gate, Harness, Lookup, ScriptedEnrichment,
    ScriptedFeed, StoreFault,
};
use vulnsync_server::ingest::{
    IngestConfig, IngestError, IngestScheduler, IngestionRun, RetryError, RunStatus, SkipReason,
    SyncOutcome,
};

fn finished(outcome: SyncOutcome) -> IngestionRun {
    match outcome {
        SyncOutcome::Finished(run) => run,
        SyncOutcome::Skipped(reason) => panic!("sync was skipped: {:?}", reason),
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_advisory_run_completes() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-2022-24684"]),
        ScriptedEnrichment::new().found("CVE-2022-24684", &[]),
    );

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.cursor, 1);
    assert_eq!(run.total, Some(1));
    assert_eq!(run.since, None);
    assert!(run.completed.is_some());

    let stored = h.service.dataset().record("CVE-2022-24684").await.unwrap();
    let stored = stored.expect("record should be stored");
    assert_eq!(stored.cve_id, "CVE-2022-24684");
    assert_eq!(stored.summary.as_deref(), Some("Summary of CVE-2022-24684"));
    assert!(h.service.dataset().alias_keys().await.unwrap().is_empty());

    assert_eq!(h.service.history().len().await.unwrap(), 1);
    assert_eq!(h.service.get_status().await.unwrap(), Some(run));
}

#[tokio::test(start_paused = true)]
async fn test_aliases_point_at_canonical_id() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-2024-0001"]),
        ScriptedEnrichment::new().found("CVE-2024-0001", &["GHSA-aaaa-bbbb-cccc", "PYSEC-2024-1"]),
    );

    finished(h.service.sync().await.unwrap());

    let dataset = h.service.dataset();
    assert_eq!(
        dataset.canonical_id("GHSA-aaaa-bbbb-cccc").await.unwrap().as_deref(),
        Some("CVE-2024-0001")
    );
    assert_eq!(
        dataset.canonical_id("PYSEC-2024-1").await.unwrap().as_deref(),
        Some("CVE-2024-0001")
    );
}

#[tokio::test(start_paused = true)]
async fn test_record_keyed_by_enrichment_id() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-2024-0002"]),
        ScriptedEnrichment::new().with("CVE-2024-0002", Lookup::Found(record("GHSA-xxxx", &[]))),
    );

    finished(h.service.sync().await.unwrap());

    assert!(h.service.dataset().record("GHSA-xxxx").await.unwrap().is_some());
    assert!(h.service.dataset().record("CVE-2024-0002").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pages_are_checkpointed() {
    let h = Harness::new(
        ingester_config(2),
        ScriptedFeed::new(&["CVE-1", "CVE-2", "CVE-3", "CVE-4", "CVE-5"]),
        ScriptedEnrichment::new()
            .found("CVE-1", &[])
            .found("CVE-2", &[])
            .found("CVE-3", &[])
            .found("CVE-4", &[])
            .found("CVE-5", &[]),
    );

    let run = finished(h.service.sync().await.unwrap());
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.cursor, 5);
    assert_eq!(run.total, Some(5));

    let offsets: Vec<u32> = h.feed.calls().iter().map(|c| c.offset).collect();
    assert_eq!(offsets, vec![0, 2, 4, 6]);

    let checkpoints: Vec<(RunStatus, u32)> = h
        .store
        .history_writes()
        .iter()
        .map(|run| (run.status, run.cursor))
        .collect();
    assert_eq!(
        checkpoints,
        vec![
            (RunStatus::Processing, 0),
            (RunStatus::Processing, 0),
            (RunStatus::Processing, 2),
            (RunStatus::Processing, 4),
            (RunStatus::Completed, 5),
        ]
    );
    // One history entry per run, updated in place
    assert_eq!(h.service.history().len().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_advisory_is_skipped_without_retry() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-2024-1000", "CVE-2024-1001"]),
        ScriptedEnrichment::new().found("CVE-2024-1000", &[]),
    );
    let started = Instant::now();

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.enrichment.calls_for("CVE-2024-1001"), 1);
    assert!(h.service.dataset().record("CVE-2024-1001").await.unwrap().is_none());
    assert!(h.service.dataset().record("CVE-2024-1000").await.unwrap().is_some());
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_transient_enrichment_failures_recover() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-2024-2000"]),
        ScriptedEnrichment::new()
            .with("CVE-2024-2000", Lookup::TransientThen(2, record("CVE-2024-2000", &[]))),
    );
    let started = Instant::now();

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.enrichment.calls_for("CVE-2024-2000"), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(20));
    assert!(h.service.dataset().record("CVE-2024-2000").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_item_does_not_cancel_siblings() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-A", "CVE-B"]),
        ScriptedEnrichment::new()
            .found("CVE-A", &["GHSA-a"])
            .with("CVE-B", Lookup::TransientForever),
    );
    let started = Instant::now();

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::CompletedWithErrors);
    assert_eq!(run.cursor, 0);
    assert_eq!(run.total, Some(2));
    assert_eq!(run.completed, None);

    assert!(h.service.dataset().record("CVE-A").await.unwrap().is_some());
    assert!(h.service.dataset().record("CVE-B").await.unwrap().is_none());
    assert_eq!(h.enrichment.calls_for("CVE-B"), 31);
    assert_eq!(started.elapsed(), Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn test_non_transient_enrichment_error_stops_run() {
    let h = Harness::new(
        ingester_config(1),
        ScriptedFeed::new(&["CVE-A", "CVE-B"]),
        ScriptedEnrichment::new()
            .with("CVE-A", Lookup::Fatal)
            .found("CVE-B", &[]),
    );

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::CompletedWithErrors);
    assert_eq!(run.cursor, 0);
    assert_eq!(h.enrichment.calls_for("CVE-A"), 1);
    // The second page is never requested
    assert_eq!(h.enrichment.calls_for("CVE-B"), 0);
    assert_eq!(h.feed.calls_at(1), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_fetch_failures_recover() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-1"]).failing_at(0, FeedFailure::Transient(3)),
        ScriptedEnrichment::new().found("CVE-1", &[]),
    );
    let started = Instant::now();

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.feed.calls_at(0), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(h.store.writes_with_status(RunStatus::CompletedWithErrors), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_budget_exhaustion_ends_run_once() {
    let h = Harness::new(
        ingester_config(1),
        ScriptedFeed::new(&["CVE-A", "CVE-B"]).failing_at(1, FeedFailure::TransientForever),
        ScriptedEnrichment::new().found("CVE-A", &[]).found("CVE-B", &[]),
    );
    let started = Instant::now();

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::CompletedWithErrors);
    assert_eq!(run.cursor, 1);
    assert_eq!(run.total, Some(2));
    assert!(run.completed.is_some());
    assert_eq!(h.feed.calls_at(1), 31);
    assert_eq!(started.elapsed(), Duration::from_secs(300));

    // The failure is written exactly once, not once per attempt
    assert_eq!(h.store.writes_with_status(RunStatus::CompletedWithErrors), 1);
    assert!(h.service.dataset().record("CVE-A").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_non_transient_fetch_error_is_not_retried() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-1"]).failing_at(0, FeedFailure::Fatal),
        ScriptedEnrichment::new(),
    );

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::CompletedWithErrors);
    assert_eq!(run.cursor, 0);
    assert_eq!(run.total, None);
    assert_eq!(h.feed.calls_at(0), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_persist_failures_recover() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-A"]),
        ScriptedEnrichment::new().found("CVE-A", &[]),
    );
    h.store.fail_document_writes("vulns:CVE-A", StoreFault::Transient(2));
    let started = Instant::now();

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(started.elapsed(), Duration::from_secs(20));
    assert!(h.service.dataset().record("CVE-A").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_persist_budget_exhaustion_keeps_checkpoint() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-A", "CVE-B"]),
        ScriptedEnrichment::new().found("CVE-A", &[]).found("CVE-B", &[]),
    );
    h.store.fail_document_writes("vulns:CVE-A", StoreFault::TransientForever);
    let started = Instant::now();

    let run = finished(h.service.sync().await.unwrap());

    assert_eq!(run.status, RunStatus::CompletedWithErrors);
    assert_eq!(run.cursor, 0);
    assert_eq!(run.total, Some(2));
    assert_eq!(run.completed, None);
    assert_eq!(started.elapsed(), Duration::from_secs(300));
    assert!(h.service.dataset().record("CVE-A").await.unwrap().is_none());
    assert!(h.service.dataset().record("CVE-B").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_transient_history_write_failure_is_retried() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-A"]),
        ScriptedEnrichment::new().found("CVE-A", &[]),
    );
    h.store.fail_history_writes(StoreFault::Transient(1));
    let started = Instant::now();

    let first = finished(h.service.sync().await.unwrap());
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(h.service.get_status().await.unwrap(), Some(first));

    // The next run is incremental, not a restart
    let calls_before = h.feed.calls().len();
    let second = finished(h.service.sync().await.unwrap());
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.since, Some(first.started));
    let incremental = &h.feed.calls()[calls_before];
    assert_eq!(incremental.since, Some(first.started));
    assert!(incremental.until.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_history_write_does_not_leave_run_processing() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-A"]),
        ScriptedEnrichment::new().found("CVE-A", &[]),
    );
    let first = finished(h.service.sync().await.unwrap());
    assert_eq!(first.status, RunStatus::Completed);

    // The checkpoint of the second run fails outright; the fallback write goes through
    h.store.fail_history_writes(StoreFault::Permanent(1));
    let err = h.service.sync().await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Checkpoint {
            cursor: 0,
            source: RetryError::Aborted(_),
        }
    ));

    let current = h.service.get_status().await.unwrap().unwrap();
    assert_eq!(current.status, RunStatus::CompletedWithErrors);
    assert_eq!(current.since, Some(first.started));
    assert_eq!(current.cursor, 0);

    // The failed window is retried rather than restarted from scratch
    let calls_before = h.feed.calls().len();
    let third = finished(h.service.sync().await.unwrap());
    assert_eq!(third.status, RunStatus::Completed);
    assert_eq!(third.since, Some(first.started));
    assert_eq!(h.feed.calls()[calls_before].since, Some(first.started));
    assert_eq!(h.service.history().len().await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_runs_follow_resume_policy() {
    let h = Harness::new(
        ingester_config(1),
        ScriptedFeed::new(&["CVE-A", "CVE-B"]).failing_at(1, FeedFailure::TransientForever),
        ScriptedEnrichment::new().found("CVE-A", &[]).found("CVE-B", &[]),
    );

    // First run: full sync that dies on the second page
    let first = finished(h.service.sync().await.unwrap());
    assert_eq!(first.status, RunStatus::CompletedWithErrors);
    assert_eq!(first.cursor, 1);

    // Second run resumes the same window at the failing offset
    h.feed.clear_failures();
    let calls_before = h.feed.calls().len();
    let second = finished(h.service.sync().await.unwrap());
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.since, None);
    assert_eq!(second.cursor, 2);
    let resumed = &h.feed.calls()[calls_before];
    assert_eq!(resumed.offset, 1);
    assert_eq!(resumed.since, None);
    assert_eq!(resumed.until, None);

    // Third run is incremental from the second run's start
    let calls_before = h.feed.calls().len();
    let before_third = Utc::now();
    let third = finished(h.service.sync().await.unwrap());
    assert_eq!(third.status, RunStatus::Completed);
    assert_eq!(third.since, Some(second.started));
    let incremental = &h.feed.calls()[calls_before];
    assert_eq!(incremental.offset, 0);
    assert_eq!(incremental.since, Some(second.started));
    let until = incremental.until.expect("window must have an upper bound");
    assert!(until >= before_third);

    assert_eq!(h.service.history().len().await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_window_bounds_stay_fixed_for_the_run() {
    let h = Harness::new(
        ingester_config(1),
        ScriptedFeed::new(&["CVE-A", "CVE-B", "CVE-C"]),
        ScriptedEnrichment::new(),
    );
    finished(h.service.sync().await.unwrap());
    let calls_before = h.feed.calls().len();

    finished(h.service.sync().await.unwrap());

    let calls = &h.feed.calls()[calls_before..];
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|c| c.since == calls[0].since && c.until == calls[0].until));
}

#[tokio::test(start_paused = true)]
async fn test_crash_guard_reconciles_processing_run() {
    let h = Harness::empty();
    let crashed = IngestionRun::start(Utc::now(), 1000, None, 3000).with_total(9000);
    h.service.history().push_run(crashed).await.unwrap();

    let reconciled = h.service.recover_interrupted_run().await.unwrap();

    let expected = crashed.with_status(RunStatus::CompletedWithErrors);
    assert_eq!(reconciled, Some(expected));
    assert_eq!(h.service.get_status().await.unwrap(), Some(expected));
    assert_eq!(expected.completed, None);
    assert_eq!(h.service.history().len().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_crash_guard_leaves_finished_runs_alone() {
    let h = Harness::empty();
    assert_eq!(h.service.recover_interrupted_run().await.unwrap(), None);

    let done = IngestionRun::start(Utc::now(), 1000, None, 0)
        .with_total(0)
        .with_status(RunStatus::Completed)
        .with_completed(Some(Utc::now()));
    h.service.history().push_run(done).await.unwrap();

    assert_eq!(h.service.recover_interrupted_run().await.unwrap(), None);
    assert_eq!(h.service.get_status().await.unwrap(), Some(done));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_trigger_is_skipped() {
    let gate = Gate::new();
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-1"]).with_gate(gate.clone()),
        ScriptedEnrichment::new().found("CVE-1", &[]),
    );

    let service = h.service.clone();
    let first = tokio::spawn(async move { service.sync().await });
    gate.entered.notified().await;

    let second = h.service.sync().await.unwrap();
    assert_eq!(second, SyncOutcome::Skipped(SkipReason::AlreadyRunning));

    gate.release.notify_one();
    let run = finished(first.await.unwrap().unwrap());
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.service.history().len().await.unwrap(), 1);

    // The lock is released once the run ends
    let third = finished(h.service.sync().await.unwrap());
    assert_eq!(third.since, Some(run.started));
}

#[tokio::test(start_paused = true)]
async fn test_sync_skipped_when_not_ingester() {
    let h = Harness::new(
        IngestConfig::default(),
        ScriptedFeed::new(&["CVE-1"]),
        ScriptedEnrichment::new(),
    );

    let outcome = h.service.sync().await.unwrap();

    assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::NotIngester));
    assert!(h.feed.calls().is_empty());
    assert_eq!(h.service.get_status().await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_reconciles_before_first_tick() {
    let h = Harness::new(
        IngestConfig {
            initial_delay_secs: 10,
            schedule_every_secs: 3600,
            ..ingester_config(1000)
        },
        ScriptedFeed::new(&["CVE-1"]),
        ScriptedEnrichment::new().found("CVE-1", &[]),
    );
    let crashed = IngestionRun::start(Utc::now(), 1000, None, 0);
    h.service.history().push_run(crashed).await.unwrap();

    let handle = IngestScheduler::new(h.service.clone())
        .start()
        .await
        .unwrap()
        .expect("ingester must start the scheduler");

    let status = h.service.get_status().await.unwrap().unwrap();
    assert_eq!(status.status, RunStatus::CompletedWithErrors);
    assert!(h.feed.calls().is_empty());

    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(h.feed.calls().len(), 2);
    let status = h.service.get_status().await.unwrap().unwrap();
    assert_eq!(status.status, RunStatus::Completed);
    assert_eq!(h.service.history().len().await.unwrap(), 2);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_not_started_for_non_ingester() {
    let h = Harness::new(IngestConfig::default(), ScriptedFeed::new(&[]), ScriptedEnrichment::new());
    let crashed = IngestionRun::start(Utc::now(), 1000, None, 0);
    h.service.history().push_run(crashed).await.unwrap();

    let handle = IngestScheduler::new(h.service.clone()).start().await.unwrap();

    assert!(handle.is_none());
    // Only ingesters reconcile
    assert_eq!(h.service.get_status().await.unwrap(), Some(crashed));
}

#[tokio::test(start_paused = true)]
async fn test_history_is_bounded() {
    let h = Harness::new(
        IngestConfig {
            history_capacity: 3,
            ..ingester_config(1000)
        },
        ScriptedFeed::new(&[]),
        ScriptedEnrichment::new(),
    );

    for _ in 0..5 {
        finished(h.service.sync().await.unwrap());
    }

    assert_eq!(h.service.history().len().await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_delete_all_clears_history_and_dataset() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&["CVE-1"]),
        ScriptedEnrichment::new().found("CVE-1", &["GHSA-1"]),
    );
    finished(h.service.sync().await.unwrap());

    h.service.delete_all().await.unwrap();

    assert_eq!(h.service.get_status().await.unwrap(), None);
    assert!(h.service.dataset().record_keys().await.unwrap().is_empty());
    assert!(h.service.dataset().alias_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_purl_lookup_skips_upstream_for_empty_input() {
    let h = Harness::new(
        ingester_config(1000),
        ScriptedFeed::new(&[]),
        ScriptedEnrichment::new().with_purl("pkg:npm/lodash@4.17.20", &["GHSA-1", "GHSA-2"]),
    );

    let empty = h.service.find_vulnerabilities_by_purls(&[]).await.unwrap();
    assert!(empty.is_empty());
    assert_eq!(h.enrichment.purl_queries(), 0);

    let found = h
        .service
        .find_vulnerabilities_by_purls(&[
            "pkg:npm/lodash@4.17.20".to_string(),
            "pkg:npm/left-pad@1.0.0".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(found["pkg:npm/lodash@4.17.20"], vec!["GHSA-1", "GHSA-2"]);
    assert!(found["pkg:npm/left-pad@1.0.0"].is_empty());
    assert_eq!(h.enrichment.purl_queries(), 1);
}
