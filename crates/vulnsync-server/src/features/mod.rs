//! Feature modules implementing the vulnsync HTTP surface
//!
//! Each feature is a vertical slice with its own queries, commands and routes.
//!
//! # Features
//!
//! - **admin**: Ingestion status and dataset export/import
//! - **purls**: Advisory lookup by package URL
//!
//! # Architecture
//!
//! Each feature module follows the structure:
//! - `commands/` - Write operations
//! - `queries/` - Read operations
//! - `routes.rs` - HTTP route definitions

pub mod admin;
pub mod purls;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::ingest::IngestionService;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub service: Arc<IngestionService>,
}

/// Creates the router with all feature routes mounted
///
/// - `/health` - Liveness plus store connectivity
/// - `/admin` - Ingestion status, export and import
/// - `/purls` - Package URL lookup
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .route("/health", get(health_check))
        .nest("/admin", admin::admin_routes())
        .nest("/purls", purls::purls_routes())
        .with_state(state.service)
}

/// Health check handler
async fn health_check(State(service): State<Arc<IngestionService>>) -> impl IntoResponse {
    match service.history().len().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "store": "connected"
            })),
        ),
        Err(e) => {
            tracing::error!("Store health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "store": "unreachable"
                })),
            )
        }
    }
}
