//! Bounded history of ingestion runs
//!
//! Runs are kept in one list, newest first. The head is the current run.

use std::sync::Arc;

use super::models::IngestionRun;
use crate::store::{CommandStore, StoreError, StoreResult};

/// List key holding the run history
pub const HISTORY_KEY: &str = "ingestions:updates";

#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn CommandStore>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn CommandStore>, capacity: usize) -> Self {
        Self { store, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The most recently pushed run
    pub async fn current_run(&self) -> StoreResult<Option<IngestionRun>> {
        match self.store.list_index(HISTORY_KEY, 0).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Overwrite the head entry in place. Fails when no run has been pushed yet.
    pub async fn replace_current_run(&self, run: IngestionRun) -> StoreResult<IngestionRun> {
        let raw = serde_json::to_string(&run)?;
        self.store
            .list_set(HISTORY_KEY, 0, raw)
            .await
            .map_err(|e| match e {
                StoreError::IndexOutOfRange { .. } => {
                    StoreError::NoSuchKey(HISTORY_KEY.to_string())
                }
                other => other,
            })?;
        Ok(run)
    }

    /// Prepend a new current run, evicting the oldest entry when at capacity.
    pub async fn push_run(&self, run: IngestionRun) -> StoreResult<IngestionRun> {
        let raw = serde_json::to_string(&run)?;
        self.store
            .list_push_front_capped(HISTORY_KEY, raw, self.capacity)
            .await?;
        Ok(run)
    }

    /// Number of runs recorded
    pub async fn len(&self) -> StoreResult<usize> {
        self.store.list_len(HISTORY_KEY).await
    }

    /// Discard everything in the backing store, dataset included.
    pub async fn clear(&self) -> StoreResult<()> {
        self.store.flush_all().await
    }
}
