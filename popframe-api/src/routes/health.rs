//! Health Check Endpoints
//!
//! - /health/ping - plain "pong"
//! - /health/live - process is alive
//! - /health/ready - artifact cache is writable and enumerable, with entry
//!   counts

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use popframe_storage::{ArtifactCache, CacheStats};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub cache: ComponentHealth,
    /// Regions with a cached model
    pub cached_regions: u64,
    pub cached_layers: u64,
    pub cache_size_bytes: u64,
    /// Region computations currently running
    pub in_flight: usize,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.orchestrator.cache();

    let (cache_health, stats) = match check_cache(cache).await {
        Ok((latency, stats)) => (
            ComponentHealth {
                status: HealthStatus::Healthy,
                latency_ms: Some(latency),
                error: None,
            },
            stats,
        ),
        Err(e) => (
            ComponentHealth {
                status: HealthStatus::Unhealthy,
                latency_ms: None,
                error: Some(e),
            },
            CacheStats::default(),
        ),
    };

    let overall_status = cache_health.status;
    let response = HealthResponse {
        status: overall_status,
        message: None,
        details: Some(HealthDetails {
            cache: cache_health,
            cached_regions: stats.models,
            cached_layers: stats.layers,
            cache_size_bytes: stats.size_bytes,
            in_flight: state.orchestrator.coalescer().in_flight_count(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };

    let status_code = if overall_status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

/// Write and remove a probe file, then collect entry counts.
async fn check_cache(cache: &ArtifactCache) -> Result<(u64, CacheStats), String> {
    let start = Instant::now();

    let probe = cache.models_dir().join(".ready-probe");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| format!("Cache is not writable: {}", e))?;
    tokio::fs::remove_file(&probe)
        .await
        .map_err(|e| format!("Cache probe cleanup failed: {}", e))?;

    let stats = cache
        .stats()
        .await
        .map_err(|e| format!("Cache enumeration failed: {}", e))?;

    Ok((start.elapsed().as_millis() as u64, stats))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            message: Some("Process is alive".to_string()),
            details: None,
        };
        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["message"], "Process is alive");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_component_health_skips_empty_fields() {
        let component = ComponentHealth {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            error: Some("Cache is not writable".to_string()),
        };
        let json = serde_json::to_value(&component).expect("serialize");
        assert_eq!(json["status"], "unhealthy");
        assert!(json.get("latency_ms").is_none());
    }
}
