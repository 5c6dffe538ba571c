//! NVD → OSV vulnerability ingestion
//!
//! # Architecture
//!
//! - **config**: Configuration for ingestion (INGEST_*, NVD_*, OSV_* environment variables)
//! - **models**: Run state and normalized vulnerability records
//! - **history**: Bounded run history, head = current run
//! - **dataset**: Records and the alias index
//! - **retry**: Fixed-backoff retry with a time budget
//! - **orchestrator**: Resume policy, page loop, enrichment fan-out, crash recovery
//! - **scheduler**: Periodic trigger
//! - **backup**: Export/import of the dataset as a command script
//! - **stats**: Per-run counters
//!
//! # Public API
//!
//! The administrative endpoints are provided through the `features::admin` module:
//! - `GET /admin/status` - Current ingestion run
//! - `GET /admin/export/{vulnerabilities,aliases,ingestions}` - Backup scripts
//! - `POST /admin/import` - Replay a backup script

pub mod backup;
pub mod config;
pub mod dataset;
pub mod history;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod stats;

pub use backup::{BackupCodec, ImportSummary};
pub use config::{IngestConfig, NvdConfig, OsvConfig};
pub use dataset::DatasetStore;
pub use history::{HistoryStore, HISTORY_KEY};
pub use models::{IngestionRun, RunStatus, VulnerabilityRecord};
pub use orchestrator::{next_run, IngestError, IngestionService, SkipReason, SyncOutcome};
pub use retry::{with_retry, RetryError, RetryPolicy};
pub use scheduler::IngestScheduler;
pub use stats::IngestStats;
