//! Export query
//!
//! Renders part of the dataset as a replayable command script.

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::ingest::IngestionService;

/// What to export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportTarget {
    Vulnerabilities,
    Aliases,
    Ingestions,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExportQuery {
    pub target: ExportTarget,
}

/// Export never fails as a whole; per-entity failures appear as comment lines.
pub async fn handle(service: &IngestionService, query: ExportQuery) -> String {
    match query.target {
        ExportTarget::Vulnerabilities => service.export_vulnerabilities().collect().await,
        ExportTarget::Aliases => service.export_aliases().collect().await,
        ExportTarget::Ingestions => service.export_ingestion().await,
    }
}
