//! Find vulnerabilities by package URL

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::clients::ClientError;
use crate::ingest::IngestionService;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindVulnerabilitiesQuery {
    #[serde(default)]
    pub purls: Vec<String>,
}

/// Advisory ids keyed by package URL
pub type FindVulnerabilitiesResponse = HashMap<String, Vec<String>>;

pub async fn handle(
    service: &IngestionService,
    query: FindVulnerabilitiesQuery,
) -> Result<FindVulnerabilitiesResponse, ClientError> {
    service.find_vulnerabilities_by_purls(&query.purls).await
}
