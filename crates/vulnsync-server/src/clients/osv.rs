//! OSV API client

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::{build_http_client, ClientError, EnrichmentRecord, EnrichmentSource};
use crate::ingest::config::OsvConfig;

const SERVICE: &str = "osv";

#[derive(Debug, Serialize)]
struct BatchQuery<'a> {
    queries: Vec<PackageQuery<'a>>,
}

#[derive(Debug, Serialize)]
struct PackageQuery<'a> {
    package: PurlRef<'a>,
}

#[derive(Debug, Serialize)]
struct PurlRef<'a> {
    purl: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    results: Vec<BatchResult>,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    #[serde(default)]
    vulns: Option<Vec<VulnRef>>,
}

#[derive(Debug, Deserialize)]
struct VulnRef {
    id: String,
}

/// [`EnrichmentSource`] over `GET /v1/vulns/{id}` and `POST /v1/querybatch`
#[derive(Debug, Clone)]
pub struct OsvClient {
    client: reqwest::Client,
    base_url: String,
    batch_size: usize,
}

impl OsvClient {
    pub fn new(config: &OsvConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(config.timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
        })
    }

    /// Map a response to `Ok(None)` on 404, an error on any other failure status.
    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        url: String,
    ) -> Result<Option<T>, ClientError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
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
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| ClientError::Decode {
                service: SERVICE,
                message: format!("{} ({})", e, url),
            })
    }

    async fn query_batch(&self, purls: &[String]) -> Result<Vec<Vec<String>>, ClientError> {
        let url = format!("{}/v1/querybatch", self.base_url);
        let body = BatchQuery {
            queries: purls
                .iter()
                .map(|purl| PackageQuery {
                    package: PurlRef { purl },
                })
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                service: SERVICE,
                source,
            })?;

        let parsed: BatchResponse =
            Self::decode(response, url.clone())
                .await?
                .ok_or_else(|| ClientError::Status {
                    service: SERVICE,
                    status: StatusCode::NOT_FOUND.as_u16(),
                    url: url.clone(),
                })?;

        if parsed.results.len() != purls.len() {
            return Err(ClientError::Decode {
                service: SERVICE,
                message: format!(
                    "expected {} batch results, got {}",
                    purls.len(),
                    parsed.results.len()
                ),
            });
        }

        Ok(parsed
            .results
            .into_iter()
            .map(|result| {
                result
                    .vulns
                    .unwrap_or_default()
                    .into_iter()
                    .map(|v| v.id)
                    .collect()
            })
            .collect())
    }
}

#[async_trait]
impl EnrichmentSource for OsvClient {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<EnrichmentRecord>, ClientError> {
        let url = format!("{}/v1/vulns/{}", self.base_url, id);
        debug!(id, "Fetching OSV record");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                service: SERVICE,
                source,
            })?;

        Self::decode(response, url).await
    }

    async fn query_by_package_refs(
        &self,
        refs: &[String],
    ) -> Result<HashMap<String, Vec<String>>, ClientError> {
        let mut found = HashMap::with_capacity(refs.len());
        for batch in refs.chunks(self.batch_size) {
            debug!(batch_len = batch.len(), "Querying OSV batch");
            let results = self.query_batch(batch).await?;
            for (purl, ids) in batch.iter().zip(results) {
                found.insert(purl.clone(), ids);
            }
        }
        Ok(found)
    }
}
