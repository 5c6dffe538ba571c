//! Ingestion configuration
//!
//! Configuration for the NVD sync pipeline: scheduling, paging, retry budget and the
//! upstream endpoints it talks to.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::retry::RetryPolicy;
use crate::config::env_or;

/// Default advisories requested per feed page
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Default interval between scheduled runs (1 hour)
pub const DEFAULT_SCHEDULE_EVERY_SECS: u64 = 3600;

/// Default delay before the first scheduled run
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 10;

/// Default delay between retry attempts
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 10;

/// Default retry budget (5 minutes)
pub const DEFAULT_RETRY_BUDGET_SECS: u64 = 300;

/// Default number of runs kept in the history list
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Default NVD API base URL
pub const DEFAULT_NVD_API_URL: &str = "https://services.nvd.nist.gov";

/// Default OSV API base URL
pub const DEFAULT_OSV_API_URL: &str = "https://api.osv.dev";

/// Default HTTP timeout for upstream calls
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Default package references per OSV batch query
pub const DEFAULT_OSV_BATCH_SIZE: usize = 1000;

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Whether this process is an ingester (runs the crash guard and the scheduler)
    pub enabled: bool,
    /// Advisories requested per feed page
    pub page_size: u32,
    /// Seconds between scheduled runs
    pub schedule_every_secs: u64,
    /// Seconds before the first scheduled run
    pub initial_delay_secs: u64,
    /// Seconds between retry attempts
    pub retry_backoff_secs: u64,
    /// Seconds of retrying allowed after the first attempt
    pub retry_budget_secs: u64,
    /// Runs kept in the history list
    pub history_capacity: usize,
    /// Advisory feed settings
    pub nvd: NvdConfig,
    /// Enrichment source settings
    pub osv: OsvConfig,
}

/// NVD feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvdConfig {
    pub base_url: String,
    /// Optional API key, raises the upstream rate limit
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

/// OSV enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsvConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Package references per batch query
    pub batch_size: usize,
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            enabled: env_or("INGEST_ENABLED", false),
            page_size: env_or("INGEST_PAGE_SIZE", DEFAULT_PAGE_SIZE),
            schedule_every_secs: env_or("INGEST_SCHEDULE_EVERY_SECS", DEFAULT_SCHEDULE_EVERY_SECS),
            initial_delay_secs: env_or("INGEST_INITIAL_DELAY_SECS", DEFAULT_INITIAL_DELAY_SECS),
            retry_backoff_secs: env_or("INGEST_RETRY_BACKOFF_SECS", DEFAULT_RETRY_BACKOFF_SECS),
            retry_budget_secs: env_or("INGEST_RETRY_BUDGET_SECS", DEFAULT_RETRY_BUDGET_SECS),
            history_capacity: env_or("INGEST_HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY),
            nvd: NvdConfig::from_env(),
            osv: OsvConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.page_size == 0 {
            anyhow::bail!("INGEST_PAGE_SIZE must be greater than 0");
        }
        if self.schedule_every_secs == 0 {
            anyhow::bail!("INGEST_SCHEDULE_EVERY_SECS must be greater than 0");
        }
        if self.history_capacity == 0 {
            anyhow::bail!("INGEST_HISTORY_CAPACITY must be greater than 0");
        }
        if self.retry_budget_secs < self.retry_backoff_secs {
            tracing::warn!(
                "INGEST_RETRY_BUDGET_SECS ({}) is shorter than INGEST_RETRY_BACKOFF_SECS ({}), failures will not be retried",
                self.retry_budget_secs,
                self.retry_backoff_secs
            );
        }
        self.nvd.validate()?;
        self.osv.validate()?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry_backoff_secs),
            Duration::from_secs(self.retry_budget_secs),
        )
    }

    pub fn schedule_every(&self) -> Duration {
        Duration::from_secs(self.schedule_every_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

impl NvdConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("NVD_API_URL")
                .unwrap_or_else(|_| DEFAULT_NVD_API_URL.to_string()),
            api_key: std::env::var("NVD_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout_secs: env_or("NVD_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.is_empty() {
            anyhow::bail!("NVD_API_URL cannot be empty");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("NVD_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OsvConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OSV_API_URL")
                .unwrap_or_else(|_| DEFAULT_OSV_API_URL.to_string()),
            timeout_secs: env_or("OSV_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            batch_size: env_or("OSV_BATCH_SIZE", DEFAULT_OSV_BATCH_SIZE),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.is_empty() {
            anyhow::bail!("OSV_API_URL cannot be empty");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("OSV_TIMEOUT_SECS must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("OSV_BATCH_SIZE must be greater than 0");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            page_size: DEFAULT_PAGE_SIZE,
            schedule_every_secs: DEFAULT_SCHEDULE_EVERY_SECS,
            initial_delay_secs: DEFAULT_INITIAL_DELAY_SECS,
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            retry_budget_secs: DEFAULT_RETRY_BUDGET_SECS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            nvd: NvdConfig::default(),
            osv: OsvConfig::default(),
        }
    }
}

impl Default for NvdConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_NVD_API_URL.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl Default for OsvConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OSV_API_URL.to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            batch_size: DEFAULT_OSV_BATCH_SIZE,
        }
    }
}
