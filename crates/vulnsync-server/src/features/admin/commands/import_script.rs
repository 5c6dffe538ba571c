//! Import script command
//!
//! Replays an exported script against the store.

use axum::body::Bytes;

use crate::ingest::{ImportSummary, IngestionService};
use crate::store::StoreError;

#[derive(Debug, Clone)]
pub struct ImportScriptCommand {
    pub script: Bytes,
}

pub async fn handle(
    service: &IngestionService,
    command: ImportScriptCommand,
) -> Result<ImportSummary, StoreError> {
    service.import_script(&command.script).await
}
