//! REST API Routes
//!
//! - `/model_calculator/*`: recomputation, cached regions, layers
//! - `/health/*`: liveness and readiness probes

pub mod health;
pub mod regions;

use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::state::AppState;

pub use health::create_router as health_router;
pub use regions::create_router as regions_router;

/// Assemble the service router.
pub fn create_api_router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .nest("/model_calculator", regions::create_router(state.clone()))
        .nest("/health", health::create_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(server))
}

fn build_cors_layer(server: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods([
        Method::GET,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ]);

    if server.cors_origins.is_empty() {
        tracing::info!("CORS: allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!("CORS: allowing origins {:?}", server.cors_origins);
        let origins: Vec<HeaderValue> = server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
    }
}
