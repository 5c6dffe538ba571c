//! PostgreSQL store backend
//!
//! Keys live in a single `store_entries` table (see `migrations/`). Strings and JSON
//! documents are one row each; lists are stored as a JSONB array, head first, and every
//! list mutation is a read-modify-write inside one transaction holding a per-key
//! advisory lock.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::info;

use super::{resolve_index, CommandStore, StoreError, StoreResult, ValueKind};
use crate::config::DatabaseConfig;

/// [`CommandStore`] backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool. The schema must already be migrated.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database configuration and apply pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!("Database connection pool established");

        Self::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled migrations.
    pub async fn migrate(pool: &PgPool) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch(&self, key: &str) -> StoreResult<Option<(ValueKind, Value)>> {
        let row = sqlx::query("SELECT kind, value FROM store_entries WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_row(&row)).transpose()
    }

    async fn upsert(&self, key: &str, kind: ValueKind, value: Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO store_entries (key, kind, value, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (key) DO UPDATE
            SET kind = EXCLUDED.kind, value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(kind.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Run a list mutation under the key's lock. `None` means the key does not exist;
    /// leaving the list empty deletes the key.
    async fn mutate_list<T, F>(&self, key: &str, mutate: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Option<Vec<String>>) -> StoreResult<T> + Send,
        T: Send,
    {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        let mut list = load_list(&mut tx, key).await?;
        let result = mutate(&mut list)?;

        match list {
            Some(items) if !items.is_empty() => {
                sqlx::query(
                    r#"
                    INSERT INTO store_entries (key, kind, value, updated_at)
                    VALUES ($1, 'list', $2, NOW())
                    ON CONFLICT (key) DO UPDATE
                    SET kind = 'list', value = EXCLUDED.value, updated_at = NOW()
                    "#,
                )
                .bind(key)
                .bind(Value::from(items))
                .execute(&mut *tx)
                .await?;
            }
            _ => {
                sqlx::query("DELETE FROM store_entries WHERE key = $1")
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(result)
    }

    async fn read_list(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.fetch(key).await? {
            None => Ok(Vec::new()),
            Some((ValueKind::List, value)) => Ok(serde_json::from_value(value)?),
            Some((kind, _)) => Err(wrong_type(key, kind)),
        }
    }
}

fn wrong_type(key: &str, kind: ValueKind) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        actual: kind.as_str(),
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> StoreResult<(ValueKind, Value)> {
    let kind: String = row.try_get("kind")?;
    let value: Value = row.try_get("value")?;
    Ok((kind.parse()?, value))
}

async fn load_list(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
) -> StoreResult<Option<Vec<String>>> {
    let row = sqlx::query("SELECT kind, value FROM store_entries WHERE key = $1 FOR UPDATE")
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;
    match row.map(|row| decode_row(&row)).transpose()? {
        None => Ok(None),
        Some((ValueKind::List, value)) => Ok(Some(serde_json::from_value(value)?)),
        Some((kind, _)) => Err(wrong_type(key, kind)),
    }
}

#[async_trait]
impl CommandStore for PgStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.fetch(key).await? {
            None => Ok(None),
            Some((ValueKind::String, Value::String(s))) => Ok(Some(s)),
            Some((ValueKind::String, other)) => Ok(Some(other.to_string())),
            Some((kind, _)) => Err(wrong_type(key, kind)),
        }
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.upsert(key, ValueKind::String, Value::String(value)).await
    }

    async fn json_get(&self, key: &str) -> StoreResult<Option<Value>> {
        match self.fetch(key).await? {
            None => Ok(None),
            Some((ValueKind::Json, value)) => Ok(Some(value)),
            Some((kind, _)) => Err(wrong_type(key, kind)),
        }
    }

    async fn json_set(&self, key: &str, value: Value) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO store_entries (key, kind, value, updated_at)
            VALUES ($1, 'json', $2, NOW())
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, updated_at = NOW()
            WHERE store_entries.kind = 'json'
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let kind = self
                .fetch(key)
                .await?
                .map(|(kind, _)| kind)
                .unwrap_or(ValueKind::String);
            return Err(wrong_type(key, kind));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM store_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_index(&self, key: &str, index: i64) -> StoreResult<Option<String>> {
        let list = self.read_list(key).await?;
        Ok(resolve_index(list.len(), index).and_then(|i| list.get(i).cloned()))
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        Ok(self.read_list(key).await?.len())
    }

    async fn list_push_front(&self, key: &str, value: String) -> StoreResult<usize> {
        self.mutate_list(key, move |list| {
            let items = list.get_or_insert_with(Vec::new);
            items.insert(0, value);
            Ok(items.len())
        })
        .await
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
        self.mutate_list(key, move |list| {
            let items = list.get_or_insert_with(Vec::new);
            items.truncate(capacity - 1);
            items.insert(0, value);
            Ok(items.len())
        })
        .await
    }

    async fn list_pop_back(&self, key: &str) -> StoreResult<Option<String>> {
        self.mutate_list(key, |list| Ok(list.as_mut().and_then(|items| items.pop())))
            .await
    }

    async fn list_set(&self, key: &str, index: i64, value: String) -> StoreResult<()> {
        self.mutate_list(key, move |list| {
            let items = list
                .as_mut()
                .ok_or_else(|| StoreError::NoSuchKey(key.to_string()))?;
            let slot = resolve_index(items.len(), index)
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| StoreError::IndexOutOfRange {
                    key: key.to_string(),
                    index,
                })?;
            *slot = value;
            Ok(())
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = format!("{}%", escape_like(prefix));
        let keys = sqlx::query_scalar::<_, String>(
            r"SELECT key FROM store_entries WHERE key LIKE $1 ESCAPE '\' ORDER BY key",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn flush_all(&self) -> StoreResult<()> {
        sqlx::query("DELETE FROM store_entries")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Escape LIKE metacharacters so the prefix matches literally.
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
