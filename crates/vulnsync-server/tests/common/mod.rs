//! Shared fixtures for integration tests
//!
//! Scripted stand-ins for the advisory feed and the enrichment source, a store wrapper
//! that records history writes and injects write failures, and a harness wiring them into an [`IngestionService`].

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use vulnsync_server::clients::{
    AdvisoryFeed, ClientError, EnrichmentRecord, EnrichmentSource, FeedItem, FeedPage,
};
use vulnsync_server::ingest::{IngestConfig, IngestionRun, IngestionService, RunStatus, HISTORY_KEY};
use vulnsync_server::store::{CommandStore, MemoryStore, StoreError, StoreResult};

pub fn transient_error() -> ClientError {
    ClientError::Status {
        service: "fake",
        status: 503,
        url: "http://fake.invalid".to_string(),
    }
}

pub fn fatal_error() -> ClientError {
    ClientError::Decode {
        service: "fake",
        message: "unexpected payload".to_string(),
    }
}

/// Enrichment record with the given id and aliases
pub fn record(id: &str, aliases: &[&str]) -> EnrichmentRecord {
    EnrichmentRecord {
        id: id.to_string(),
        summary: Some(format!("Summary of {}", id)),
        details: Some(format!("Details of {}, it's bad", id)),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        affected: vec![],
        severity: vec![],
    }
}

/// Ingester config with the given page size and default retry timings
pub fn ingester_config(page_size: u32) -> IngestConfig {
    IngestConfig {
        enabled: true,
        page_size,
        ..IngestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum FeedFailure {
    /// Fail transiently this many times, then serve the page
    Transient(u32),
    TransientForever,
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedCall {
    pub offset: u32,
    pub page_size: u32,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Holds the first fetch until released
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    armed: Arc<AtomicBool>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        }
    }
}

/// Serves a fixed list of advisory ids, paged by offset.
pub struct ScriptedFeed {
    ids: Vec<String>,
    failures: Mutex<HashMap<u32, FeedFailure>>,
    calls: Mutex<Vec<FeedCall>>,
    gate: Option<Gate>,
}

impl ScriptedFeed {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|id| id.to_string()).collect(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn failing_at(self, offset: u32, failure: FeedFailure) -> Self {
        self.failures.lock().unwrap().insert(offset, failure);
        self
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<FeedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_at(&self, offset: u32) -> usize {
        self.calls().iter().filter(|c| c.offset == offset).count()
    }

    fn next_failure(&self, offset: u32) -> Option<ClientError> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&offset) {
            Some(FeedFailure::Transient(0)) | None => None,
            Some(FeedFailure::Transient(remaining)) => {
                *remaining -= 1;
                Some(transient_error())
            }
            Some(FeedFailure::TransientForever) => Some(transient_error()),
            Some(FeedFailure::Fatal) => Some(fatal_error()),
        }
    }
}

#[async_trait]
impl AdvisoryFeed for ScriptedFeed {
    async fn fetch_page(
        &self,
        offset: u32,
        page_size: u32,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<FeedPage, ClientError> {
        self.calls.lock().unwrap().push(FeedCall {
            offset,
            page_size,
            since,
            until,
        });

        if let Some(gate) = &self.gate {
            if gate.armed.swap(false, Ordering::SeqCst) {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }

        if let Some(error) = self.next_failure(offset) {
            return Err(error);
        }

        let start = (offset as usize).min(self.ids.len());
        let end = (start + page_size as usize).min(self.ids.len());
        Ok(FeedPage {
            total_results: self.ids.len() as u32,
            start_index: offset,
            items: self.ids[start..end]
                .iter()
                .map(|id| FeedItem { id: id.clone() })
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Lookup {
    Found(EnrichmentRecord),
    /// Fail transiently this many times, then return the record
    TransientThen(u32, EnrichmentRecord),
    TransientForever,
    Fatal,
}

/// Per-id scripted lookups; unknown ids are not found.
#[derive(Default)]
pub struct ScriptedEnrichment {
    lookups: Mutex<HashMap<String, Lookup>>,
    calls: Mutex<HashMap<String, usize>>,
    purls: HashMap<String, Vec<String>>,
    purl_queries: AtomicUsize,
}

impl ScriptedEnrichment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, id: &str, lookup: Lookup) -> Self {
        self.lookups.lock().unwrap().insert(id.to_string(), lookup);
        self
    }

    pub fn found(self, id: &str, aliases: &[&str]) -> Self {
        self.with(id, Lookup::Found(record(id, aliases)))
    }

    pub fn with_purl(mut self, purl: &str, ids: &[&str]) -> Self {
        self.purls
            .insert(purl.to_string(), ids.iter().map(|id| id.to_string()).collect());
        self
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn purl_queries(&self) -> usize {
        self.purl_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentSource for ScriptedEnrichment {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<EnrichmentRecord>, ClientError> {
        *self.calls.lock().unwrap().entry(id.to_string()).or_default() += 1;

        let mut lookups = self.lookups.lock().unwrap();
        match lookups.get_mut(id) {
            None => Ok(None),
            Some(Lookup::Found(record)) => Ok(Some(record.clone())),
            Some(Lookup::TransientThen(0, record)) => Ok(Some(record.clone())),
            Some(Lookup::TransientThen(remaining, _)) => {
                *remaining -= 1;
                Err(transient_error())
            }
            Some(Lookup::TransientForever) => Err(transient_error()),
            Some(Lookup::Fatal) => Err(fatal_error()),
        }
    }

    async fn query_by_package_refs(
        &self,
        refs: &[String],
    ) -> Result<HashMap<String, Vec<String>>, ClientError> {
        self.purl_queries.fetch_add(1, Ordering::SeqCst);
        Ok(refs
            .iter()
            .map(|purl| (purl.clone(), self.purls.get(purl).cloned().unwrap_or_default()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// How a store write fails
#[derive(Debug, Clone, Copy)]
pub enum StoreFault {
    /// Fail transiently this many times, then succeed
    Transient(u32),
    TransientForever,
    /// Fail with a non-transient error this many times, then succeed
    Permanent(u32),
}

impl StoreFault {
    /// The error for the next write, consuming one failure
    fn trip(&mut self) -> Option<StoreError> {
        match self {
            StoreFault::Transient(0) | StoreFault::Permanent(0) => None,
            StoreFault::Transient(remaining) => {
                *remaining -= 1;
                Some(StoreError::Database(sqlx::Error::PoolTimedOut))
            }
            StoreFault::TransientForever => Some(StoreError::Database(sqlx::Error::PoolTimedOut)),
            StoreFault::Permanent(remaining) => {
                *remaining -= 1;
                Some(StoreError::WrongType {
                    key: "injected".to_string(),
                    actual: "string",
                })
            }
        }
    }
}

/// [`MemoryStore`] that records every run written to the history list and can fail
/// chosen writes.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    history_writes: Mutex<Vec<IngestionRun>>,
    history_fault: Mutex<Option<StoreFault>>,
    document_faults: Mutex<HashMap<String, StoreFault>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_writes(&self) -> Vec<IngestionRun> {
        self.history_writes.lock().unwrap().clone()
    }

    /// Writes that carried the given status
    pub fn writes_with_status(&self, status: RunStatus) -> usize {
        self.history_writes()
            .iter()
            .filter(|run| run.status == status)
            .count()
    }

    /// Fail in-place updates of the current run
    pub fn fail_history_writes(&self, fault: StoreFault) {
        *self.history_fault.lock().unwrap() = Some(fault);
    }

    /// Fail JSON document writes to `key`
    pub fn fail_document_writes(&self, key: &str, fault: StoreFault) {
        self.document_faults.lock().unwrap().insert(key.to_string(), fault);
    }

    fn history_fault(&self, key: &str) -> StoreResult<()> {
        if key != HISTORY_KEY {
            return Ok(());
        }
        match self.history_fault.lock().unwrap().as_mut().and_then(StoreFault::trip) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn document_fault(&self, key: &str) -> StoreResult<()> {
        match self.document_faults.lock().unwrap().get_mut(key).and_then(StoreFault::trip) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record_write(&self, key: &str, value: &str) {
        if key == HISTORY_KEY {
            if let Ok(run) = serde_json::from_str(value) {
                self.history_writes.lock().unwrap().push(run);
            }
        }
    }
}

#[async_trait]
impl CommandStore for RecordingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.inner.set(key, value).await
    }

    async fn json_get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.inner.json_get(key).await
    }

    async fn json_set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.document_fault(key)?;
        self.inner.json_set(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn list_index(&self, key: &str, index: i64) -> StoreResult<Option<String>> {
        self.inner.list_index(key, index).await
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        self.inner.list_len(key).await
    }

    async fn list_push_front(&self, key: &str, value: String) -> StoreResult<usize> {
        self.record_write(key, &value);
        self.inner.list_push_front(key, value).await
    }

    async fn list_push_front_capped(
        &self,
        key: &str,
        value: String,
        capacity: usize,
    ) -> StoreResult<usize> {
        self.record_write(key, &value);
        self.inner.list_push_front_capped(key, value, capacity).await
    }

    async fn list_pop_back(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.list_pop_back(key).await
    }

    async fn list_set(&self, key: &str, index: i64, value: String) -> StoreResult<()> {
        self.history_fault(key)?;
        self.record_write(key, &value);
        self.inner.list_set(key, index, value).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.scan_prefix(prefix).await
    }

    async fn flush_all(&self) -> StoreResult<()> {
        self.inner.flush_all().await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub service: Arc<IngestionService>,
    pub store: Arc<RecordingStore>,
    pub feed: Arc<ScriptedFeed>,
    pub enrichment: Arc<ScriptedEnrichment>,
}

impl Harness {
    pub fn new(config: IngestConfig, feed: ScriptedFeed, enrichment: ScriptedEnrichment) -> Self {
        let store = Arc::new(RecordingStore::new());
        let feed = Arc::new(feed);
        let enrichment = Arc::new(enrichment);
        let service = Arc::new(IngestionService::new(
            config,
            store.clone(),
            feed.clone(),
            enrichment.clone(),
        ));
        Self {
            service,
            store,
            feed,
            enrichment,
        }
    }

    /// Ingester with an empty feed
    pub fn empty() -> Self {
        Self::new(ingester_config(1000), ScriptedFeed::new(&[]), ScriptedEnrichment::new())
    }
}
