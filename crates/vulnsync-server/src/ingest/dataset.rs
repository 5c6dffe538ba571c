//! Normalized vulnerability records and the alias index

use std::sync::Arc;

use super::models::VulnerabilityRecord;
use crate::store::{CommandStore, StoreResult};

/// Key prefix for records (`vulns:<id>`)
pub const RECORD_PREFIX: &str = "vulns:";

/// Key prefix for aliases (`aliases:<alias>`)
pub const ALIAS_PREFIX: &str = "aliases:";

pub fn record_key(id: &str) -> String {
    format!("{}{}", RECORD_PREFIX, id)
}

pub fn alias_key(alias: &str) -> String {
    format!("{}{}", ALIAS_PREFIX, alias)
}

#[derive(Clone)]
pub struct DatasetStore {
    store: Arc<dyn CommandStore>,
}

impl DatasetStore {
    pub fn new(store: Arc<dyn CommandStore>) -> Self {
        Self { store }
    }

    /// Store a record under its canonical id, replacing any previous version.
    pub async fn save_record(&self, record: &VulnerabilityRecord) -> StoreResult<()> {
        let doc = serde_json::to_value(record)?;
        self.store.json_set(&record_key(&record.cve_id), doc).await
    }

    /// Point every alias at `canonical_id`.
    pub async fn save_aliases(&self, aliases: &[String], canonical_id: &str) -> StoreResult<()> {
        for alias in aliases {
            self.store
                .set(&alias_key(alias), canonical_id.to_string())
                .await?;
        }
        Ok(())
    }

    pub async fn record(&self, id: &str) -> StoreResult<Option<VulnerabilityRecord>> {
        self.record_at(&record_key(id)).await
    }

    /// Read a record by its full store key
    pub async fn record_at(&self, key: &str) -> StoreResult<Option<VulnerabilityRecord>> {
        match self.store.json_get(key).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Canonical id an alias points at
    pub async fn canonical_id(&self, alias: &str) -> StoreResult<Option<String>> {
        self.store.get(&alias_key(alias)).await
    }

    /// Read an alias target by its full store key
    pub async fn alias_at(&self, key: &str) -> StoreResult<Option<String>> {
        self.store.get(key).await
    }

    pub async fn record_keys(&self) -> StoreResult<Vec<String>> {
        self.store.scan_prefix(RECORD_PREFIX).await
    }

    pub async fn alias_keys(&self) -> StoreResult<Vec<String>> {
        self.store.scan_prefix(ALIAS_PREFIX).await
    }
}
