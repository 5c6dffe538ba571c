//! Key/value command store
//!
//! Everything vulnsync persists goes through [`CommandStore`]: plain string keys,
//! JSON documents and lists, addressed by key. The command set mirrors the handful of
//! Redis-style commands the ingestion pipeline issues, so that exported scripts
//! (`SET`, `JSON.SET`, `LPUSH`, ...) can be replayed against any backend via
//! [`CommandStore::execute`].
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`]: process-local, used by tests and single-node deployments
//! - [`PgStore`]: PostgreSQL-backed, one row per key

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod postgres;
pub mod script;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by store backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WRONGTYPE operation against key '{key}' holding a {actual} value")]
    WrongType { key: String, actual: &'static str },

    #[error("No such key: {0}")]
    NoSuchKey(String),

    #[error("Index {index} out of range for list '{key}'")]
    IndexOutOfRange { key: String, index: i64 },

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Invalid arguments for '{command}': {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error("Syntax error: {0}")]
    Syntax(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only backend I/O failures qualify; type mismatches and malformed commands fail
    /// the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(e)) => {
                e.code().is_some_and(|code| is_transient_sqlstate(&code))
            }
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
            ),
            _ => false,
        }
    }

    fn invalid(command: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidArguments {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

/// SQLSTATE classes that can clear up on their own: connection exception (08),
/// transaction rollback (40), insufficient resources (53) and operator intervention (57).
/// Constraint, syntax and data errors fail the same way every time.
pub(crate) fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code.get(..2), Some("08" | "40" | "53" | "57"))
}

/// Kind of value held under a key. A key holds exactly one kind at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Json,
    List,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Json => "json",
            ValueKind::List => "list",
        }
    }
}

impl std::str::FromStr for ValueKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ValueKind::String),
            "json" => Ok(ValueKind::Json),
            "list" => Ok(ValueKind::List),
            other => Err(StoreError::Syntax(format!("unknown value kind '{}'", other))),
        }
    }
}

/// Resolve a Redis-style list index (negative counts from the tail).
pub(crate) fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let resolved = if index < 0 {
        i64::try_from(len).ok()? + index
    } else {
        index
    };
    usize::try_from(resolved).ok().filter(|i| *i < len)
}

/// Store command interface.
///
/// Lists are ordered head-first: index 0 is the most recently pushed element.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// `GET key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `SET key value` (replaces whatever the key held)
    async fn set(&self, key: &str, value: String) -> StoreResult<()>;

    /// `JSON.GET key $`
    async fn json_get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// `JSON.SET key $ value`
    async fn json_set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// `DEL key`, returns whether the key existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// `LINDEX key index`
    async fn list_index(&self, key: &str, index: i64) -> StoreResult<Option<String>>;

    /// `LLEN key`
    async fn list_len(&self, key: &str) -> StoreResult<usize>;

    /// `LPUSH key value`, returns the new length
    async fn list_push_front(&self, key: &str, value: String) -> StoreResult<usize>;

    /// Atomic `RPOP` while at capacity followed by `LPUSH`.
    ///
    /// The list never holds more than `capacity` elements afterwards.
    async fn list_push_front_capped(
        &self,
        key: &str,
        value: String,
        capacity: usize,
    ) -> StoreResult<usize>;

    /// `RPOP key`
    async fn list_pop_back(&self, key: &str) -> StoreResult<Option<String>>;

    /// `LSET key index value`; fails on a missing key or an out-of-range index
    async fn list_set(&self, key: &str, index: i64, value: String) -> StoreResult<()>;

    /// Keys starting with `prefix`, sorted
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// `FLUSHALL`
    async fn flush_all(&self) -> StoreResult<()>;

    /// Replay a raw command, as found in an exported script.
    async fn execute(&self, command: &str, args: &[String]) -> StoreResult<()> {
        match StoreCommand::parse(command, args)? {
            StoreCommand::Set { key, value } => self.set(&key, value).await,
            StoreCommand::JsonSet { key, value } => self.json_set(&key, value).await,
            StoreCommand::LPush { key, values } => {
                for value in values {
                    self.list_push_front(&key, value).await?;
                }
                Ok(())
            }
            StoreCommand::RPop { key } => self.list_pop_back(&key).await.map(|_| ()),
            StoreCommand::LSet { key, index, value } => self.list_set(&key, index, value).await,
            StoreCommand::Del { keys } => {
                for key in keys {
                    self.delete(&key).await?;
                }
                Ok(())
            }
            StoreCommand::FlushAll => self.flush_all().await,
        }
    }
}

/// Write commands accepted by [`CommandStore::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    Set { key: String, value: String },
    JsonSet { key: String, value: Value },
    LPush { key: String, values: Vec<String> },
    RPop { key: String },
    LSet { key: String, index: i64, value: String },
    Del { keys: Vec<String> },
    FlushAll,
}

impl StoreCommand {
    /// Parse a command name (case-insensitive) and its arguments.
    pub fn parse(command: &str, args: &[String]) -> StoreResult<Self> {
        let name = command.to_ascii_uppercase();
        match name.as_str() {
            "SET" => match args {
                [key, value] => Ok(StoreCommand::Set {
                    key: key.clone(),
                    value: value.clone(),
                }),
                _ => Err(StoreError::invalid(&name, "expected SET <key> <value>")),
            },
            "JSON.SET" => match args {
                [key, path, json] => {
                    if path != "$" && path != "." {
                        return Err(StoreError::invalid(
                            &name,
                            format!("only the root path is supported, got '{}'", path),
                        ));
                    }
                    let value = serde_json::from_str(json).map_err(|e| {
                        StoreError::invalid(&name, format!("invalid JSON document: {}", e))
                    })?;
                    Ok(StoreCommand::JsonSet {
                        key: key.clone(),
                        value,
                    })
                }
                _ => Err(StoreError::invalid(&name, "expected JSON.SET <key> $ <json>")),
            },
            "LPUSH" => match args {
                [key, values @ ..] if !values.is_empty() => Ok(StoreCommand::LPush {
                    key: key.clone(),
                    values: values.to_vec(),
                }),
                _ => Err(StoreError::invalid(&name, "expected LPUSH <key> <value>...")),
            },
            "RPOP" => match args {
                [key] => Ok(StoreCommand::RPop { key: key.clone() }),
                _ => Err(StoreError::invalid(&name, "expected RPOP <key>")),
            },
            "LSET" => match args {
                [key, index, value] => {
                    let index = index.parse().map_err(|_| {
                        StoreError::invalid(&name, format!("'{}' is not an integer", index))
                    })?;
                    Ok(StoreCommand::LSet {
                        key: key.clone(),
                        index,
                        value: value.clone(),
                    })
                }
                _ => Err(StoreError::invalid(&name, "expected LSET <key> <index> <value>")),
            },
            "DEL" => {
                if args.is_empty() {
                    return Err(StoreError::invalid(&name, "expected DEL <key>..."));
                }
                Ok(StoreCommand::Del {
                    keys: args.to_vec(),
                })
            }
            "FLUSHALL" => {
                if !args.is_empty() {
                    return Err(StoreError::invalid(&name, "FLUSHALL takes no arguments"));
                }
                Ok(StoreCommand::FlushAll)
            }
            _ => Err(StoreError::UnknownCommand(command.to_string())),
        }
    }
}
