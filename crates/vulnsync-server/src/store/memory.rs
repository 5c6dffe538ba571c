//! In-memory store backend

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::RwLock;

use super::{resolve_index, CommandStore, StoreError, StoreResult, ValueKind};

#[derive(Debug, Clone)]
enum Entry {
    Text(String),
    Json(Value),
    List(VecDeque<String>),
}

impl Entry {
    fn kind(&self) -> ValueKind {
        match self {
            Entry::Text(_) => ValueKind::String,
            Entry::Json(_) => ValueKind::Json,
            Entry::List(_) => ValueKind::List,
        }
    }
}

fn wrong_type(key: &str, entry: &Entry) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        actual: entry.kind().as_str(),
    }
}

/// Process-local [`CommandStore`].
///
/// A single `RwLock` guards the keyspace, so every command is atomic with respect to
/// every other command.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held
    pub async fn key_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CommandStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.entries.read().await.get(key) {
            None => Ok(None),
            Some(Entry::Text(value)) => Ok(Some(value.clone())),
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry::Text(value));
        Ok(())
    }

    async fn json_get(&self, key: &str) -> StoreResult<Option<Value>> {
        match self.entries.read().await.get(key) {
            None => Ok(None),
            Some(Entry::Json(value)) => Ok(Some(value.clone())),
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    async fn json_set(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            None | Some(Entry::Json(_)) => {
                entries.insert(key.to_string(), Entry::Json(value));
                Ok(())
            }
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list_index(&self, key: &str, index: i64) -> StoreResult<Option<String>> {
        match self.entries.read().await.get(key) {
            None => Ok(None),
            Some(Entry::List(list)) => {
                Ok(resolve_index(list.len(), index).and_then(|i| list.get(i).cloned()))
            }
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        match self.entries.read().await.get(key) {
            None => Ok(0),
            Some(Entry::List(list)) => Ok(list.len()),
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    async fn list_push_front(&self, key: &str, value: String) -> StoreResult<usize> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry {
            Entry::List(list) => {
                list.push_front(value);
                Ok(list.len())
            }
            other => Err(wrong_type(key, other)),
        }
    }

    async fn list_push_front_capped(
        &self,
        key: &str,
        value: String,
        capacity: usize,
    ) -> StoreResult<usize> {
        if capacity == 0 {
            return Err(StoreError::invalid("LPUSH", "list capacity must be positive"));
        }
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry {
            Entry::List(list) => {
                while list.len() >= capacity {
                    list.pop_back();
                }
                list.push_front(value);
                Ok(list.len())
            }
            other => Err(wrong_type(key, other)),
        }
    }

    async fn list_pop_back(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.write().await;
        let (popped, now_empty) = match entries.get_mut(key) {
            None => return Ok(None),
            Some(Entry::List(list)) => {
                let popped = list.pop_back();
                (popped, list.is_empty())
            }
            Some(other) => return Err(wrong_type(key, other)),
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(popped)
    }

    async fn list_set(&self, key: &str, index: i64, value: String) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            None => Err(StoreError::NoSuchKey(key.to_string())),
            Some(Entry::List(list)) => {
                let slot = resolve_index(list.len(), index)
                    .and_then(|i| list.get_mut(i))
                    .ok_or_else(|| StoreError::IndexOutOfRange {
                        key: key.to_string(),
                        index,
                    })?;
                *slot = value;
                Ok(())
            }
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn flush_all(&self) -> StoreResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}
