//! Remote data gateway against in-process upstream services.

mod support;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use popframe_core::{GatewayError, GraphType, PopframeError, RegionId, TerritoryId};
use popframe_gateway::{IndicatorValue, RegionDataSource, RemoteDataGateway};
use serde_json::{json, Value};

use support::{gateway_config, spawn_upstream};

type Params = Query<HashMap<String, String>>;

fn square(id: i64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[[id as f64, 0.0], [id as f64 + 1.0, 0.0], [id as f64 + 1.0, 1.0], [id as f64, 0.0]]]
    })
}

async fn urban_catalog(Query(q): Params) -> (StatusCode, Json<Value>) {
    if q.get("parent_id").map(String::as_str) != Some("12639") {
        return (StatusCode::BAD_REQUEST, Json(json!({"detail": "wrong parent"})));
    }
    (
        StatusCode::OK,
        Json(json!([
            {"territory_id": 3138, "name": "excluded"},
            {"territory_id": 42, "name": "Region 42"},
            {"territory_id": 77}
        ])),
    )
}

async fn urban_territory(Path(id): Path<i64>) -> (StatusCode, Json<Value>) {
    match id {
        42 => (StatusCode::OK, Json(json!({"territory_id": 42, "geometry": square(42)}))),
        13 => (
            StatusCode::OK,
            Json(json!({"territory_id": 13, "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 1.0]]]}})),
        ),
        _ => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"detail": "maintenance"}))),
    }
}

async fn urban_settlements(Query(q): Params) -> Json<Value> {
    let flags = ["get_all_levels", "cities_only", "centers_only"];
    if !flags.iter().all(|f| q.get(*f).map(String::as_str) == Some("true")) {
        return Json(json!({"type": "FeatureCollection", "features": []}));
    }
    match q.get("parent_id").map(String::as_str) {
        Some("42") => Json(json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [30.1, 59.9]},
                 "properties": {"territory_id": 1, "name": "Alpha"}},
                {"type": "Feature", "geometry": square(2),
                 "properties": {"territory_id": 2}}
            ]
        })),
        _ => Json(json!({"type": "FeatureCollection", "features": []})),
    }
}

fn urban_router() -> Router {
    Router::new()
        .route("/api/v1/all_territories_without_geometry", get(urban_catalog))
        .route("/api/v1/territory/:id", get(urban_territory))
        .route("/api/v1/all_territories", get(urban_settlements))
}

async fn transport_matrix(Path(id): Path<i64>, Query(q): Params) -> (StatusCode, Json<Value>) {
    if q.get("graph_type").map(String::as_str) != Some("car") {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "graph_type"})));
    }
    let body = match id {
        42 => json!({"index": [1, 2], "columns": [1, 2], "values": [[0.0, 12.5], [13.0, 0.0]]}),
        7 => json!({"index": [], "columns": [], "values": []}),
        _ => json!({"index": [1, 2], "columns": [1, 2], "values": [[0.0, 1.0], [2.0]]}),
    };
    (StatusCode::OK, Json(body))
}

fn transport_router() -> Router {
    Router::new().route("/:id/get_matrix", get(transport_matrix))
}

async fn gateway() -> RemoteDataGateway {
    let urban = spawn_upstream(urban_router()).await;
    let transport = spawn_upstream(transport_router()).await;
    RemoteDataGateway::new(&gateway_config(&urban, &transport)).expect("gateway")
}

#[tokio::test]
async fn test_list_regions_uses_catalog_parent() {
    let gateway = gateway().await;
    let regions = gateway.list_regions().await.expect("catalog");
    assert_eq!(regions, vec![RegionId::new(3138), RegionId::new(42), RegionId::new(77)]);
}

#[tokio::test]
async fn test_region_boundary() {
    let gateway = gateway().await;
    let boundary = gateway.get_region_boundary(RegionId::new(42)).await.expect("boundary");
    assert_eq!(boundary.type_name(), "Polygon");
}

#[tokio::test]
async fn test_unparseable_boundary_reports_raw_geometry() {
    let gateway = gateway().await;
    let err = gateway
        .get_region_boundary(RegionId::new(13))
        .await
        .expect_err("open ring");
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.message(), "Error geometry parsing for borders of region 13");
    assert_eq!(err.input()["type"], "Polygon");
}

#[tokio::test]
async fn test_upstream_failure_propagates_unchanged() {
    let gateway = gateway().await;
    let err = gateway
        .get_region_boundary(RegionId::new(99))
        .await
        .expect_err("maintenance");
    match err {
        PopframeError::Gateway(GatewayError::Http { status, body, url, .. }) => {
            assert_eq!(status, 503);
            assert_eq!(body, json!({"detail": "maintenance"}));
            assert!(url.ends_with("/api/v1/territory/99"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_settlements_keep_catalog_order() {
    let gateway = gateway().await;
    let sites = gateway.get_settlements(RegionId::new(42)).await.expect("settlements");
    assert_eq!(sites.len(), 2);
    assert_eq!(sites[0].territory_id, TerritoryId::new(1));
    assert_eq!(sites[0].name.as_deref(), Some("Alpha"));
    assert_eq!(sites[1].territory_id, TerritoryId::new(2));
    assert!(sites[1].name.is_none());

    let empty = gateway.get_settlements(RegionId::new(5)).await.expect("no settlements");
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_matrix_fetch() {
    let gateway = gateway().await;
    let matrix = gateway
        .get_matrix(RegionId::new(42), GraphType::Car)
        .await
        .expect("matrix");
    assert_eq!(matrix.len(), 2);
    assert_eq!(matrix.get(TerritoryId::new(1), TerritoryId::new(2)), Some(12.5));
}

#[tokio::test]
async fn test_empty_matrix_is_not_found() {
    let gateway = gateway().await;
    let err = gateway
        .get_matrix(RegionId::new(7), GraphType::Car)
        .await
        .expect_err("empty");
    assert!(err.is_not_found());
    assert_eq!(err.message(), "matrix for region 7 not found");
}

#[tokio::test]
async fn test_ragged_matrix_is_internal() {
    let gateway = gateway().await;
    let err = gateway
        .get_matrix(RegionId::new(8), GraphType::Car)
        .await
        .expect_err("ragged");
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.message(), "error during matrix parsing");
}

#[tokio::test]
async fn test_gateway_serves_as_data_source() {
    let gateway = gateway().await;
    let source: Arc<dyn RegionDataSource> = Arc::new(gateway);
    let sites = source.get_settlements(RegionId::new(42)).await.expect("settlements");
    assert_eq!(sites.len(), 2);
}

#[derive(Clone, Default)]
struct PopulationLog {
    events: Arc<Mutex<Vec<(i64, bool)>>>,
}

async fn indicator_values(
    State(log): State<PopulationLog>,
    Path(id): Path<i64>,
    Query(q): Params,
) -> (StatusCode, Json<Value>) {
    if q.get("indicator_value").map(String::as_str) != Some("1") {
        return (StatusCode::BAD_REQUEST, Json(json!({"detail": "indicator"})));
    }
    log.events.lock().expect("lock").push((id, true));
    // Later ids in a batch finish first, so ordering only holds if the
    // whole batch is awaited.
    tokio::time::sleep(Duration::from_millis(40 - (id % 15) as u64 * 2)).await;
    log.events.lock().expect("lock").push((id, false));

    let body = match id % 10 {
        0 => json!([]),
        5 => json!([{"value": 0}]),
        _ => json!([{"value": id * 100, "date_value": "2024-01-01"}]),
    };
    (StatusCode::OK, Json(body))
}

#[tokio::test]
async fn test_population_is_fetched_in_sequential_batches() {
    let log = PopulationLog::default();
    let urban = Router::new()
        .route("/api/v1/territory/:id/indicator_values", get(indicator_values))
        .with_state(log.clone());
    let urban = spawn_upstream(urban).await;
    let transport = spawn_upstream(transport_router()).await;
    let gateway = RemoteDataGateway::new(&gateway_config(&urban, &transport)).expect("gateway");

    let ids: Vec<TerritoryId> = (1..=32).map(TerritoryId::new).collect();
    let population = gateway.get_population(&ids).await.expect("population");

    // Ids ending in 0 or 5 have no positive population.
    assert_eq!(population.len(), 32 - 6);
    assert_eq!(population.get(&TerritoryId::new(7)), Some(&700));
    assert!(!population.contains_key(&TerritoryId::new(10)));
    assert!(!population.contains_key(&TerritoryId::new(15)));

    let events = log.events.lock().expect("lock").clone();
    assert_eq!(events.len(), 64);
    let batch_of = |id: i64| (id - 1) / 15;
    for (pos, (id, started)) in events.iter().enumerate() {
        if !*started {
            continue;
        }
        let batch = batch_of(*id);
        let open_from_earlier = events[..pos]
            .iter()
            .filter(|(other, s)| batch_of(*other) < batch && *s)
            .count();
        let closed_from_earlier = events[..pos]
            .iter()
            .filter(|(other, s)| batch_of(*other) < batch && !*s)
            .count();
        assert_eq!(
            open_from_earlier, closed_from_earlier,
            "territory {} started before the previous batch finished",
            id
        );
        assert_eq!(open_from_earlier as i64, batch * 15);
    }
}

#[tokio::test]
async fn test_population_failure_is_internal() {
    let urban = Router::new().route(
        "/api/v1/territory/:id/indicator_values",
        get(|| async { Json(json!({"unexpected": true})) }),
    );
    let urban = spawn_upstream(urban).await;
    let transport = spawn_upstream(transport_router()).await;
    let gateway = RemoteDataGateway::new(&gateway_config(&urban, &transport)).expect("gateway");

    let err = gateway
        .get_population(&[TerritoryId::new(4)])
        .await
        .expect_err("malformed");
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.message(), "error during population data retrieval");
}

#[tokio::test]
async fn test_put_indicator_value_body() {
    let received: Arc<Mutex<Option<Value>>> = Arc::default();
    let sink = received.clone();
    let urban = Router::new().route(
        "/api/v1/indicator_value",
        put(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                *sink.lock().expect("lock") = Some(body.clone());
                (StatusCode::CREATED, Json(json!({"id": 901})))
            }
        }),
    );
    let urban = spawn_upstream(urban).await;
    let transport = spawn_upstream(transport_router()).await;
    let gateway = RemoteDataGateway::new(&gateway_config(&urban, &transport)).expect("gateway");

    let value = IndicatorValue::yearly(207, TerritoryId::new(42), 2024, 0.75).expect("valid date");
    let response = gateway.put_indicator_value(&value).await.expect("written");
    assert_eq!(response, json!({"id": 901}));

    let body = received.lock().expect("lock").clone().expect("body received");
    assert_eq!(
        body,
        json!({
            "indicator_id": 207,
            "territory_id": 42,
            "date_type": "year",
            "date_value": "2024-01-01",
            "value": 0.75,
            "value_type": "real",
            "information_source": "popframe"
        })
    );
}

#[derive(Clone, Default)]
struct ConcurrencyProbe {
    in_flight: Arc<std::sync::atomic::AtomicUsize>,
    peak: Arc<std::sync::atomic::AtomicUsize>,
    total: Arc<std::sync::atomic::AtomicUsize>,
}

async fn probed_indicator_values(State(probe): State<ConcurrencyProbe>) -> Json<Value> {
    use std::sync::atomic::Ordering;
    let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    probe.peak.fetch_max(now, Ordering::SeqCst);
    probe.total.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(3)).await;
    probe.in_flight.fetch_sub(1, Ordering::SeqCst);
    Json(json!([{"value": 10}]))
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(12))]

    #[test]
    fn prop_population_requests_never_exceed_batch_size(count in 0usize..40, batch_size in 1usize..8) {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let (total, peak, fetched) = runtime.block_on(async move {
            let probe = ConcurrencyProbe::default();
            let urban = Router::new()
                .route("/api/v1/territory/:id/indicator_values", get(probed_indicator_values))
                .with_state(probe.clone());
            let urban = spawn_upstream(urban).await;
            let transport = spawn_upstream(transport_router()).await;
            let config = popframe_core::GatewayConfig {
                population_batch_size: batch_size,
                ..gateway_config(&urban, &transport)
            };
            let gateway = RemoteDataGateway::new(&config).expect("gateway");

            let ids: Vec<TerritoryId> = (1..=count as i64).map(TerritoryId::new).collect();
            let population = gateway.get_population(&ids).await.expect("population");
            (
                probe.total.load(std::sync::atomic::Ordering::SeqCst),
                probe.peak.load(std::sync::atomic::Ordering::SeqCst),
                population.len(),
            )
        });
        proptest::prop_assert_eq!(total, count);
        proptest::prop_assert_eq!(fetched, count);
        proptest::prop_assert!(peak <= batch_size);
    }
}
