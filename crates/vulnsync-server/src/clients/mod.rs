//! Upstream clients
//!
//! The ingestion core only sees the [`AdvisoryFeed`] and [`EnrichmentSource`] traits;
//! [`NvdClient`] and [`OsvClient`] are the HTTP implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::ingest::models::{Affected, Severity};

pub mod nvd;
pub mod osv;

pub use nvd::NvdClient;
pub use osv::OsvClient;

/// Errors raised by upstream clients
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{service} returned HTTP {status} for {url}")]
    Status {
        service: &'static str,
        status: u16,
        url: String,
    },

    #[error("{service} rate limited the request to {url}")]
    RateLimited { service: &'static str, url: String },

    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned an undecodable payload: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

impl ClientError {
    /// Network failures, timeouts, throttling and server errors may clear up on their
    /// own; client errors and malformed payloads will not.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::RateLimited { .. } => true,
            ClientError::Request { .. } => true,
            ClientError::Decode { .. } => false,
        }
    }
}

/// One page of the advisory feed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedPage {
    /// Advisories matching the query window
    pub total_results: u32,
    /// Offset this page starts at, as reported upstream
    pub start_index: u32,
    pub items: Vec<FeedItem>,
}

impl FeedPage {
    /// A page that reports nothing left to fetch
    pub fn is_exhausted(&self) -> bool {
        self.total_results == 0 || self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
}

/// Enrichment record as served by the secondary source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub affected: Vec<Affected>,
    #[serde(default)]
    pub severity: Vec<Severity>,
}

/// Paginated source of advisories
#[async_trait]
pub trait AdvisoryFeed: Send + Sync {
    /// Fetch `page_size` advisories starting at `offset`, optionally restricted to those
    /// last modified within `since..until`.
    async fn fetch_page(
        &self,
        offset: u32,
        page_size: u32,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<FeedPage, ClientError>;
}

/// Secondary source cross-referenced for every advisory
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// `Ok(None)` when the source has no record for `id`.
    async fn fetch_by_id(&self, id: &str) -> Result<Option<EnrichmentRecord>, ClientError>;

    /// Identifiers of the records affecting each package reference.
    async fn query_by_package_refs(
        &self,
        refs: &[String],
    ) -> Result<HashMap<String, Vec<String>>, ClientError>;
}

/// Shared reqwest client construction
pub(crate) fn build_http_client(timeout: std::time::Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("vulnsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| ClientError::Request {
            service: "http",
            source,
        })
}
