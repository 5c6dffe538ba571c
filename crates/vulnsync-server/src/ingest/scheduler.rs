//! Periodic ingestion trigger

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info};

use super::orchestrator::{IngestionService, SyncOutcome};
use crate::store::StoreResult;

/// Fires [`IngestionService::sync`] on a fixed interval.
pub struct IngestScheduler {
    service: Arc<IngestionService>,
}

impl IngestScheduler {
    pub fn new(service: Arc<IngestionService>) -> Self {
        Self { service }
    }

    /// Start the scheduler.
    ///
    /// This will:
    /// 1. Reconcile a run interrupted by a previous crash
    /// 2. Wait the initial delay
    /// 3. Trigger a sync on every tick, each in its own task
    ///
    /// Returns `None` when the process is not an ingester.
    pub async fn start(self) -> StoreResult<Option<JoinHandle<()>>> {
        if !self.service.is_ingester() {
            info!("Ingestion is disabled (INGEST_ENABLED=false), scheduler not started");
            return Ok(None);
        }

        // Must finish before the first trigger can observe the history
        if let Some(run) = self.service.recover_interrupted_run().await? {
            info!(cursor = run.cursor, "Interrupted run reconciled");
        }

        let config = self.service.config();
        let every = config.schedule_every();
        let initial_delay = config.initial_delay();
        info!(
            every_secs = every.as_secs(),
            initial_delay_secs = initial_delay.as_secs(),
            "Ingestion scheduler started"
        );

        let service = self.service;
        let handle = tokio::spawn(async move {
            sleep(initial_delay).await;

            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if !service.is_ingester() {
                    continue;
                }
                let service = service.clone();
                tokio::spawn(async move {
                    match service.sync().await {
                        Ok(SyncOutcome::Finished(run)) => {
                            info!(status = %run.status, cursor = run.cursor, "Scheduled sync finished");
                        }
                        Ok(SyncOutcome::Skipped(reason)) => {
                            info!(?reason, "Scheduled sync skipped");
                        }
                        Err(e) => error!("Scheduled sync failed: {}", e),
                    }
                });
            }
        });

        Ok(Some(handle))
    }
}
