//! vulnsync server library
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//!
//! Keeps a local vulnerability dataset in sync with the NVD CVE feed, enriched with
//! OSV records.
//!
//! # Overview
//!
//! - **Ingestion**: resumable, paginated NVD sync with per-page checkpoints, crash
//!   recovery and a bounded run history
//! - **Enrichment**: every advisory is looked up in OSV; records and their aliases are
//!   stored in the dataset
//! - **Backup**: the dataset exports to a command script that can be replayed into an
//!   empty store
//! - **Store**: in-memory or PostgreSQL key/value backend
//! - **HTTP**: admin endpoints and a package URL lookup (axum)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vulnsync_server::{
//!     clients::{NvdClient, OsvClient},
//!     ingest::{IngestConfig, IngestionService},
//!     store::MemoryStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let service = IngestionService::new(
//!         config.clone(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(NvdClient::new(&config.nvd)?),
//!         Arc::new(OsvClient::new(&config.osv)?),
//!     );
//!     service.sync().await?;
//!     Ok(())
//! }
//! ```

pub mod clients;
pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod store;

// Re-export commonly used types
pub use error::AppError;
