//! vulnsync server - main entry point

use anyhow::Result;
use axum::Router;
use std::{future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{signal, sync::oneshot};
use tracing::{info, warn};
use vulnsync_common::logging::{init_logging, LogConfig};

use vulnsync_server::{
    clients::{NvdClient, OsvClient},
    config::{Config, StoreBackend},
    features,
    ingest::{IngestConfig, IngestScheduler, IngestionService},
    middleware,
    store::{CommandStore, MemoryStore, PgStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("vulnsync-server".to_string())
        .filter_directives("vulnsync_server=debug,tower_http=debug,sqlx=warn".to_string())
        .build();
    let log_config = log_config.merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting vulnsync server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let store: Arc<dyn CommandStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => Arc::new(PgStore::connect(&config.store.database).await?),
    };

    let ingest_config = IngestConfig::from_env()?;
    let feed = Arc::new(NvdClient::new(&ingest_config.nvd)?);
    let enrichment = Arc::new(OsvClient::new(&ingest_config.osv)?);
    let service = Arc::new(IngestionService::new(
        ingest_config,
        store,
        feed,
        enrichment,
    ));

    // Crash guard runs inside start(), before the first tick can fire
    let _scheduler_handle = IngestScheduler::new(service.clone()).start().await?;

    let app = create_router(service, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (draining_tx, draining_rx) = oneshot::channel();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = draining_tx.send(());
    });

    // The drain deadline only starts once a signal has arrived
    let timeout_secs = config.server.shutdown_timeout_secs;
    let drain_deadline = async move {
        if draining_rx.await.is_err() {
            return std::future::pending().await;
        }
        info!("Waiting up to {} seconds for connections to close", timeout_secs);
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
    };

    tokio::select! {
        result = server.into_future() => {
            result?;
            info!("Server shut down gracefully");
        }
        _ = drain_deadline => {
            warn!(timeout_secs, "Connections still open after shutdown timeout, exiting");
        }
    }

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(service: Arc<IngestionService>, config: &Config) -> Router {
    features::router(features::FeatureState { service })
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
