//! Admin routes
//!
//! Ingestion status plus backup export/import of the vulnerability dataset.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::commands::{import_script, ImportScriptCommand};
use super::queries::{export, get_status, ExportQuery, ExportTarget, GetStatusError, GetStatusQuery};
use crate::error::AppError;
use crate::ingest::IngestionService;

/// Largest script accepted by `POST /admin/import` (1 GiB). A full vulnerability export
/// runs to hundreds of megabytes, far beyond axum's 2 MB default.
pub const MAX_IMPORT_BYTES: usize = 1024 * 1024 * 1024;

/// Create admin routes
pub fn admin_routes() -> Router<Arc<IngestionService>> {
    Router::new()
        .route("/status", get(current_status))
        .route("/export/vulnerabilities", get(export_vulnerabilities))
        .route("/export/aliases", get(export_aliases))
        .route("/export/ingestions", get(export_ingestions))
        .route(
            "/import",
            post(import).layer(DefaultBodyLimit::max(MAX_IMPORT_BYTES)),
        )
}

/// Current ingestion run
///
/// GET /admin/status
async fn current_status(State(service): State<Arc<IngestionService>>) -> Result<Response, AppError> {
    match get_status::handle(&service, GetStatusQuery::default()).await {
        Ok(run) => Ok((StatusCode::OK, Json(run)).into_response()),
        Err(GetStatusError::NotFound) => {
            Err(AppError::NotFound("No ingestion run recorded".to_string()))
        }
        Err(GetStatusError::Store(e)) => Err(e.into()),
    }
}

/// GET /admin/export/vulnerabilities
async fn export_vulnerabilities(State(service): State<Arc<IngestionService>>) -> Response {
    export_script(&service, ExportTarget::Vulnerabilities).await
}

/// GET /admin/export/aliases
async fn export_aliases(State(service): State<Arc<IngestionService>>) -> Response {
    export_script(&service, ExportTarget::Aliases).await
}

/// GET /admin/export/ingestions
async fn export_ingestions(State(service): State<Arc<IngestionService>>) -> Response {
    export_script(&service, ExportTarget::Ingestions).await
}

async fn export_script(service: &IngestionService, target: ExportTarget) -> Response {
    let script = export::handle(service, ExportQuery { target }).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        script,
    )
        .into_response()
}

/// Replay an exported script
///
/// POST /admin/import
async fn import(
    State(service): State<Arc<IngestionService>>,
    body: Bytes,
) -> Result<Response, AppError> {
    match import_script::handle(&service, ImportScriptCommand { script: body }).await {
        Ok(summary) => Ok((StatusCode::ACCEPTED, Json(summary)).into_response()),
        Err(e) => {
            tracing::error!("Unable to import script: {}", e);
            Err(e.into())
        }
    }
}
