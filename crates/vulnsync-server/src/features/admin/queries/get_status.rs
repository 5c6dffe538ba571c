//! Get status query
//!
//! Query to get the current ingestion run.

use serde::{Deserialize, Serialize};

use crate::ingest::{IngestionRun, IngestionService};
use crate::store::StoreError;

/// Query for the current run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetStatusQuery {}

/// Error type for get status query
#[derive(Debug, thiserror::Error)]
pub enum GetStatusError {
    #[error("No ingestion run recorded")]
    NotFound,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub async fn handle(
    service: &IngestionService,
    _query: GetStatusQuery,
) -> Result<IngestionRun, GetStatusError> {
    service
        .get_status()
        .await?
        .ok_or(GetStatusError::NotFound)
}
