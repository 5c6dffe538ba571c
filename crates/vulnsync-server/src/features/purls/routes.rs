//! Package URL routes

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use std::sync::Arc;

use super::queries::{find_vulnerabilities, FindVulnerabilitiesQuery};
use crate::error::AppError;
use crate::ingest::IngestionService;

/// Create purl routes
pub fn purls_routes() -> Router<Arc<IngestionService>> {
    Router::new().route("/vulnerabilities", post(lookup_vulnerabilities))
}

/// Look up the advisories affecting each package URL
///
/// POST /purls/vulnerabilities {"purls": ["pkg:npm/lodash@4.17.20"]}
async fn lookup_vulnerabilities(
    State(service): State<Arc<IngestionService>>,
    Json(query): Json<FindVulnerabilitiesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let found = find_vulnerabilities::handle(&service, query).await?;
    Ok((StatusCode::OK, Json(found)))
}
