//! Resumable NVD ingestion
//!
//! [`IngestionService`] owns one sync pipeline: it decides where a run resumes, walks the
//! feed page by page, enriches every advisory of a page concurrently and checkpoints
//! progress in the history store after each page. It is also the entry point for the
//! status, export/import and package lookup operations served over HTTP.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::backup::{BackupCodec, ImportSummary};
use super::config::IngestConfig;
use super::dataset::DatasetStore;
use super::history::HistoryStore;
use super::models::{IngestionRun, RunStatus, VulnerabilityRecord};
use super::retry::{with_retry, RetryError, RetryPolicy};
use super::stats::IngestStats;
use crate::clients::{AdvisoryFeed, ClientError, EnrichmentRecord, EnrichmentSource, FeedPage};
use crate::store::{CommandStore, StoreError, StoreResult};

/// Causes that end a run early
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Feed fetch at offset {offset} failed: {source}")]
    Feed {
        offset: u32,
        #[source]
        source: RetryError<ClientError>,
    },

    #[error("Enrichment lookup for {id} failed: {source}")]
    Enrichment {
        id: String,
        #[source]
        source: RetryError<ClientError>,
    },

    #[error("Persisting {id} failed: {source}")]
    Persist {
        id: String,
        #[source]
        source: RetryError<StoreError>,
    },

    #[error("Recording the run at cursor {cursor} failed: {source}")]
    Checkpoint {
        cursor: u32,
        #[source]
        source: RetryError<StoreError>,
    },

    #[error("History store error: {0}")]
    History(#[from] StoreError),
}

/// Why a trigger did not start a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The process is not configured as an ingester
    NotIngester,
    /// Another run holds the lock
    AlreadyRunning,
}

/// Result of a sync trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    /// The run stopped; its final state as written to the history store
    Finished(IngestionRun),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Stored,
    NotFound,
}

/// Decide where a new run starts, given the current run.
///
/// | previous              | since              | cursor            |
/// |-----------------------|--------------------|-------------------|
/// | none                  | none               | 0                 |
/// | COMPLETED             | `previous.started` | 0                 |
/// | COMPLETED_WITH_ERRORS | `previous.since`   | `previous.cursor` |
/// | PROCESSING            | none               | 0                 |
pub fn next_run(previous: Option<&IngestionRun>, now: DateTime<Utc>, page_size: u32) -> IngestionRun {
    let (since, cursor) = match previous {
        None => (None, 0),
        Some(prev) => match prev.status {
            RunStatus::Completed => (Some(prev.started), 0),
            RunStatus::CompletedWithErrors => (prev.since, prev.cursor),
            // Unreconciled crash: nothing about its progress can be trusted
            RunStatus::Processing => (None, 0),
        },
    };
    IngestionRun::start(now, page_size, since, cursor)
}

fn normalize(requested_id: &str, found: EnrichmentRecord) -> (VulnerabilityRecord, Vec<String>) {
    let cve_id = if found.id.is_empty() {
        requested_id.to_string()
    } else {
        found.id
    };
    let record = VulnerabilityRecord {
        cve_id,
        summary: found.summary,
        description: found.details,
        affected: found.affected,
        severities: found.severity,
    };
    (record, found.aliases)
}

pub struct IngestionService {
    config: IngestConfig,
    policy: RetryPolicy,
    history: HistoryStore,
    dataset: DatasetStore,
    codec: BackupCodec,
    feed: Arc<dyn AdvisoryFeed>,
    enrichment: Arc<dyn EnrichmentSource>,
    run_lock: Mutex<()>,
}

impl IngestionService {
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn CommandStore>,
        feed: Arc<dyn AdvisoryFeed>,
        enrichment: Arc<dyn EnrichmentSource>,
    ) -> Self {
        let history = HistoryStore::new(store.clone(), config.history_capacity);
        let dataset = DatasetStore::new(store.clone());
        let codec = BackupCodec::new(store, history.clone(), dataset.clone());
        Self {
            policy: config.retry_policy(),
            config,
            history,
            dataset,
            codec,
            feed,
            enrichment,
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn is_ingester(&self) -> bool {
        self.config.enabled
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn dataset(&self) -> &DatasetStore {
        &self.dataset
    }

    /// Reconcile a run left in `PROCESSING` by a crashed process.
    ///
    /// Only the status changes; `completed` stays unset. Returns the reconciled run,
    /// if there was one.
    pub async fn recover_interrupted_run(&self) -> StoreResult<Option<IngestionRun>> {
        match self.history.current_run().await? {
            Some(run) if run.status == RunStatus::Processing => {
                warn!(
                    started = %run.started,
                    cursor = run.cursor,
                    "Found interrupted ingestion run, marking it COMPLETED_WITH_ERRORS"
                );
                let reconciled = self
                    .history
                    .replace_current_run(run.with_status(RunStatus::CompletedWithErrors))
                    .await?;
                Ok(Some(reconciled))
            }
            Some(run) => {
                debug!(status = %run.status, "Last ingestion run ended cleanly");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Run one sync unless this process is not an ingester or a run is in flight.
    pub async fn sync(&self) -> Result<SyncOutcome, IngestError> {
        if !self.is_ingester() {
            debug!("Not an ingester, skipping sync");
            return Ok(SyncOutcome::Skipped(SkipReason::NotIngester));
        }
        let Ok(_guard) = self.run_lock.try_lock() else {
            info!("Ingestion already running, skipping trigger");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyRunning));
        };
        self.run().await.map(SyncOutcome::Finished)
    }

    #[instrument(skip(self), name = "ingestion_run")]
    async fn run(&self) -> Result<IngestionRun, IngestError> {
        let previous = self.history.current_run().await?;
        let run = self
            .history
            .push_run(next_run(previous.as_ref(), Utc::now(), self.config.page_size))
            .await?;
        info!(
            cursor = run.cursor,
            since = ?run.since,
            page_size = run.page_size,
            "Ingestion run started"
        );

        // Both window bounds or neither
        let until = run.since.map(|_| Utc::now());
        let mut stats = IngestStats::new();
        let mut checkpoint = run;
        let mut offset = run.cursor;

        loop {
            let page = match self.fetch_page(offset, &run, until).await {
                Ok(page) => page,
                Err(e) => {
                    error!(offset, error = %e, "Feed fetch failed, stopping run");
                    let failed = checkpoint
                        .with_status(RunStatus::CompletedWithErrors)
                        .with_completed(Some(Utc::now()))
                        .with_cursor(offset);
                    return self.finish(checkpoint, failed, stats).await;
                }
            };

            if page.is_exhausted() {
                let total = checkpoint.total.unwrap_or(page.total_results);
                let done = checkpoint
                    .with_total(total)
                    .with_cursor(total)
                    .with_status(RunStatus::Completed)
                    .with_completed(Some(Utc::now()));
                return self.finish(checkpoint, done, stats).await;
            }

            checkpoint = self
                .record(
                    checkpoint,
                    checkpoint
                        .with_total(page.total_results)
                        .with_cursor(page.start_index)
                        .with_status(RunStatus::Processing)
                        .with_completed(None),
                )
                .await?;
            debug!(
                cursor = checkpoint.cursor,
                total = page.total_results,
                items = page.items.len(),
                "Checkpointed page"
            );

            let (page_stats, outcome) = self.enrich_page(&page).await;
            stats = stats.merge(page_stats);
            if let Err(e) = outcome {
                error!(cursor = checkpoint.cursor, error = %e, "Enrichment failed, stopping run");
                return self
                    .finish(
                        checkpoint,
                        checkpoint.with_status(RunStatus::CompletedWithErrors),
                        stats,
                    )
                    .await;
            }

            offset = offset.saturating_add(run.page_size);
        }
    }

    async fn finish(
        &self,
        last: IngestionRun,
        run: IngestionRun,
        mut stats: IngestStats,
    ) -> Result<IngestionRun, IngestError> {
        let run = self.record(last, run).await?;
        stats.complete();
        info!(
            status = %run.status,
            cursor = run.cursor,
            total = ?run.total,
            pages = stats.pages_fetched,
            stored = stats.entries_stored,
            skipped = stats.entries_skipped,
            failed = stats.entries_failed,
            duration_secs = stats.duration_secs,
            "Ingestion run finished"
        );
        Ok(run)
    }

    /// Replace the current run with `next`, retrying transient store failures.
    ///
    /// If the write cannot be made, the run must not stay `PROCESSING`: one more attempt
    /// marks `last` (the state already in the store) `COMPLETED_WITH_ERRORS` so the next
    /// run resumes its window instead of restarting from scratch.
    async fn record(
        &self,
        last: IngestionRun,
        next: IngestionRun,
    ) -> Result<IngestionRun, IngestError> {
        let written = with_retry(self.policy, "history.checkpoint", StoreError::is_transient, || {
            self.history.replace_current_run(next)
        })
        .await;

        let source = match written {
            Ok(run) => return Ok(run),
            Err(source) => source,
        };
        error!(
            cursor = next.cursor,
            status = %next.status,
            error = %source,
            "Unable to record run state"
        );

        let fallback = last.with_status(RunStatus::CompletedWithErrors);
        match self.history.replace_current_run(fallback).await {
            Ok(_) => warn!(cursor = fallback.cursor, "Run marked COMPLETED_WITH_ERRORS"),
            Err(e) => error!(error = %e, "Run left in PROCESSING until the next startup reconciles it"),
        }

        Err(IngestError::Checkpoint {
            cursor: next.cursor,
            source,
        })
    }

    async fn fetch_page(
        &self,
        offset: u32,
        run: &IngestionRun,
        until: Option<DateTime<Utc>>,
    ) -> Result<FeedPage, IngestError> {
        with_retry(
            self.policy,
            "feed.fetch_page",
            ClientError::is_transient,
            || self.feed.fetch_page(offset, run.page_size, run.since, until),
        )
        .await
        .map_err(|source| IngestError::Feed { offset, source })
    }

    /// Enrich every item of the page. All items reach a terminal outcome before this
    /// returns; the first failure, if any, is reported.
    async fn enrich_page(&self, page: &FeedPage) -> (IngestStats, Result<(), IngestError>) {
        let outcomes = join_all(page.items.iter().map(|item| self.ingest_item(&item.id))).await;

        let mut stats = IngestStats {
            pages_fetched: 1,
            ..Default::default()
        };
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(ItemOutcome::Stored) => stats.inc_stored(),
                Ok(ItemOutcome::NotFound) => stats.inc_skipped(),
                Err(e) => {
                    stats.inc_failed();
                    warn!(error = %e, "Advisory failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => (stats, Err(e)),
            None => (stats, Ok(())),
        }
    }

    async fn ingest_item(&self, id: &str) -> Result<ItemOutcome, IngestError> {
        let found = with_retry(
            self.policy,
            "enrichment.fetch_by_id",
            ClientError::is_transient,
            || self.enrichment.fetch_by_id(id),
        )
        .await
        .map_err(|source| IngestError::Enrichment {
            id: id.to_string(),
            source,
        })?;

        let Some(found) = found else {
            debug!(id, "No enrichment record, skipping");
            return Ok(ItemOutcome::NotFound);
        };

        let (record, aliases) = normalize(id, found);
        with_retry(self.policy, "dataset.persist", StoreError::is_transient, || async {
            self.dataset.save_aliases(&aliases, &record.cve_id).await?;
            self.dataset.save_record(&record).await
        })
        .await
        .map_err(|source| IngestError::Persist {
            id: record.cve_id.clone(),
            source,
        })?;

        debug!(id, cve_id = %record.cve_id, aliases = aliases.len(), "Stored advisory");
        Ok(ItemOutcome::Stored)
    }

    /// The current run, if any
    pub async fn get_status(&self) -> StoreResult<Option<IngestionRun>> {
        self.history.current_run().await
    }

    pub fn export_vulnerabilities(&self) -> BoxStream<'_, String> {
        self.codec.export_vulnerabilities()
    }

    pub fn export_aliases(&self) -> BoxStream<'_, String> {
        self.codec.export_aliases()
    }

    pub async fn export_ingestion(&self) -> String {
        self.codec.export_ingestion().await
    }

    pub async fn import_script(&self, script: &[u8]) -> StoreResult<ImportSummary> {
        self.codec.import_script(script).await
    }

    /// Drop the whole store: history and dataset.
    pub async fn delete_all(&self) -> StoreResult<()> {
        warn!("Deleting all stored vulnerability data and run history");
        self.history.clear().await
    }

    /// Advisory ids affecting each package URL
    pub async fn find_vulnerabilities_by_purls(
        &self,
        purls: &[String],
    ) -> Result<HashMap<String, Vec<String>>, ClientError> {
        if purls.is_empty() {
            return Ok(HashMap::new());
        }
        self.enrichment.query_by_package_refs(purls).await
    }
}
