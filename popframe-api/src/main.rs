//! PopFrame API Server Entry Point
//!
//! Loads configuration, wires the gateway, cache and orchestrator together,
//! optionally reconciles the cache with the region catalog in the
//! background, and serves HTTP until interrupted.

use std::sync::Arc;

use popframe_api::telemetry::{init_tracing, TelemetryConfig};
use popframe_api::{create_api_router, ApiError, ApiResult, AppState, ServiceConfig};
use popframe_gateway::{RegionDataSource, RemoteDataGateway};
use popframe_models::{DisabledPublisher, LayerPublisher, ModelOrchestrator, SnapshotBuilder};
use popframe_storage::ArtifactCache;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = ServiceConfig::load()?;

    let source: Arc<dyn RegionDataSource> = Arc::new(RemoteDataGateway::new(&config.gateway)?);
    let cache = Arc::new(ArtifactCache::open(&config.cache).await?);
    let builder = Arc::new(SnapshotBuilder::new(config.orchestrator.agglomeration_time_min));
    let publisher: Arc<dyn LayerPublisher> = Arc::new(DisabledPublisher);
    let orchestrator = Arc::new(ModelOrchestrator::new(
        source,
        cache,
        builder,
        publisher,
        config.orchestrator.clone(),
        config.gateway.graph_type,
    )?);

    if config.orchestrator.reconcile_on_startup {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            match orchestrator.reconcile().await {
                Ok(report) => tracing::info!(
                    built = report.built.len(),
                    failed = report.failed.len(),
                    skipped = report.skipped.len(),
                    "Startup reconciliation finished"
                ),
                Err(e) => tracing::error!(error = %e, "Startup reconciliation aborted"),
            }
        });
    }

    let app = create_api_router(AppState::new(orchestrator), &config.server);

    let addr = config.bind_addr()?;
    tracing::info!(%addr, cache = %config.cache.root.display(), "Starting PopFrame API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
