//! Model Calculator Endpoints
//!
//! - `PUT /recalculate/{region_id}`: recompute one region and wait for it
//! - `PUT /recalculate/all`: start a bulk rebuild in the background
//! - `GET /available_regions`: region ids with a cached model
//! - `GET /regions/{region_id}`: the region's model, built first if absent
//! - `DELETE /regions/{region_id}`: evict a region's model and layers
//! - `GET /regions/{region_id}/layers/{kind}`: cached derived layer
//! - `GET /regions/{region_id}/layers/{kind}/descriptor`: published layer

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use popframe_core::{LayerKind, RegionId};
use popframe_models::RegionSnapshot;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const ALL_REGIONS: &str = "all";

// ============================================================================
// HANDLERS
// ============================================================================

/// PUT /model_calculator/recalculate/{target}
pub async fn recalculate(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> ApiResult<Response> {
    if target == ALL_REGIONS {
        let orchestrator = state.orchestrator.clone();
        tokio::spawn(async move {
            match orchestrator.rebuild_all().await {
                Ok(report) => tracing::info!(
                    built = report.built.len(),
                    failed = report.failed.len(),
                    skipped = report.skipped.len(),
                    "Rebuild of all regions finished"
                ),
                Err(e) => tracing::error!(error = %e, "Rebuild of all regions aborted"),
            }
        });
        let body = Json(json!({ "msg": "recalculation of all regions started" }));
        return Ok((StatusCode::ACCEPTED, body).into_response());
    }

    let region_id = parse_region(&target)?;
    state.orchestrator.recalculate(region_id).await?;
    tracing::info!(%region_id, "Successfully calculated model for region with id {}", region_id);
    Ok(Json(json!({
        "msg": format!("successfully calculated model for region with id {}", region_id)
    }))
    .into_response())
}

/// GET /model_calculator/available_regions
pub async fn available_regions(State(state): State<AppState>) -> ApiResult<Json<Vec<RegionId>>> {
    Ok(Json(state.orchestrator.available_regions().await?))
}

/// GET /model_calculator/regions/{region_id}
pub async fn get_region(
    State(state): State<AppState>,
    Path(region_id): Path<String>,
) -> ApiResult<Json<RegionSnapshot>> {
    let region_id = parse_region(&region_id)?;
    Ok(Json(state.orchestrator.get_or_build(region_id).await?))
}

/// DELETE /model_calculator/regions/{region_id}
pub async fn delete_region(
    State(state): State<AppState>,
    Path(region_id): Path<String>,
) -> ApiResult<StatusCode> {
    let region_id = parse_region(&region_id)?;
    state.orchestrator.invalidate(region_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /model_calculator/regions/{region_id}/layers/{kind}
pub async fn get_layer(
    State(state): State<AppState>,
    Path((region_id, kind)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let region_id = parse_region(&region_id)?;
    let kind = parse_kind(&kind)?;
    Ok(Json(state.orchestrator.layer(region_id, kind).await?))
}

/// GET /model_calculator/regions/{region_id}/layers/{kind}/descriptor
pub async fn get_layer_descriptor(
    State(state): State<AppState>,
    Path((region_id, kind)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let region_id = parse_region(&region_id)?;
    let kind = parse_kind(&kind)?;
    Ok(Json(state.orchestrator.describe_layer(region_id, kind).await?))
}

fn parse_region(raw: &str) -> ApiResult<RegionId> {
    raw.parse::<RegionId>().map_err(|e| {
        ApiError::invalid_input(format!("region id must be an integer or '{}'", ALL_REGIONS))
            .with_input(json!(raw))
            .with_details(json!({ "error": e.to_string() }))
    })
}

fn parse_kind(raw: &str) -> ApiResult<LayerKind> {
    raw.parse::<LayerKind>().map_err(|reason| {
        ApiError::invalid_input(reason)
            .with_input(json!(raw))
            .with_details(json!({ "expected": LayerKind::ALL }))
    })
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/recalculate/:target", put(recalculate))
        .route("/available_regions", get(available_regions))
        .route("/regions/:region_id", get(get_region).delete(delete_region))
        .route("/regions/:region_id/layers/:kind", get(get_layer))
        .route("/regions/:region_id/layers/:kind/descriptor", get(get_layer_descriptor))
        .with_state(state)
}
