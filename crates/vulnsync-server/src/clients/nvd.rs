//! NVD CVE API 2.0 client

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{build_http_client, AdvisoryFeed, ClientError, FeedItem, FeedPage};
use crate::ingest::config::NvdConfig;

const SERVICE: &str = "nvd";
const CVES_PATH: &str = "/rest/json/cves/2.0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CveResponse {
    #[serde(default)]
    start_index: u32,
    #[serde(default)]
    total_results: u32,
    #[serde(default)]
    vulnerabilities: Option<Vec<CveItem>>,
}

#[derive(Debug, Deserialize)]
struct CveItem {
    cve: Cve,
}

#[derive(Debug, Deserialize)]
struct Cve {
    id: String,
}

impl From<CveResponse> for FeedPage {
    fn from(response: CveResponse) -> Self {
        FeedPage {
            total_results: response.total_results,
            start_index: response.start_index,
            items: response
                .vulnerabilities
                .unwrap_or_default()
                .into_iter()
                .map(|item| FeedItem { id: item.cve.id })
                .collect(),
        }
    }
}

/// NVD timestamps: ISO-8601 with milliseconds and an explicit offset
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// [`AdvisoryFeed`] over `GET /rest/json/cves/2.0`
#[derive(Debug, Clone)]
pub struct NvdClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl NvdClient {
    pub fn new(config: &NvdConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(config.timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl AdvisoryFeed for NvdClient {
    async fn fetch_page(
        &self,
        offset: u32,
        page_size: u32,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<FeedPage, ClientError> {
        let url = format!("{}{}", self.base_url, CVES_PATH);

        let mut query = vec![
            ("startIndex", offset.to_string()),
            ("resultsPerPage", page_size.to_string()),
        ];
        // The API rejects a window with only one bound
        if let (Some(since), Some(until)) = (since, until) {
            query.push(("lastModStartDate", format_timestamp(&since)));
            query.push(("lastModEndDate", format_timestamp(&until)));
        }

        debug!(offset, page_size, ?since, "Fetching NVD page");

        let mut request = self.client.get(&url).query(&query);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request.send().await.map_err(|source| ClientError::Request {
            service: SERVICE,
            source,
        })?;

        let status = response.status();
        // NVD answers 403 when the caller exceeds its rolling request window
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited {
                service: SERVICE,
                url,
            });
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                service: SERVICE,
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await.map_err(|source| ClientError::Request {
            service: SERVICE,
            source,
        })?;
        let parsed: CveResponse =
            serde_json::from_slice(&body).map_err(|e| ClientError::Decode {
                service: SERVICE,
                message: e.to_string(),
            })?;

        Ok(parsed.into())
    }
}
