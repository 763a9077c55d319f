//! Remote data gateway for the territory catalog, indicator and matrix
//! services.
//!
//! Normalizes upstream payloads into core types. Parse failures become
//! Internal errors carrying the raw payload; HTTP failures propagate
//! unchanged from [`ApiHandler`]. The gateway adds no retries of its own.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::future::join_all;
use popframe_core::{
    AccessibilityMatrix, GatewayConfig, Geometry, GraphType, PopframeError, PopframeResult,
    RegionId, SettlementSite, TerritoryId,
};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::client::{ApiHandler, RequestOptions};
use crate::source::RegionDataSource;
use crate::wire::{IndicatorValue, MatrixPayload, TerritoryCollection, TerritoryRecord};

/// Gateway to the upstream services, sharing one connection session.
#[derive(Debug, Clone)]
pub struct RemoteDataGateway {
    urban: ApiHandler,
    transport: ApiHandler,
    session: Client,
    config: GatewayConfig,
}

impl RemoteDataGateway {
    /// Create a gateway from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a config error for invalid settings, or a transport error if
    /// the HTTP session cannot be built.
    pub fn new(config: &GatewayConfig) -> PopframeResult<Self> {
        config.validate()?;
        let urban = ApiHandler::new(&config.urban_api_url, config.request_timeout(), config.retry.clone());
        let transport = ApiHandler::new(
            &config.transport_api_url,
            config.request_timeout(),
            config.retry.clone(),
        );
        let session = urban.session()?;
        Ok(Self {
            urban,
            transport,
            session,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn urban_get(&self, endpoint: &str, options: &RequestOptions) -> PopframeResult<Value> {
        Ok(self
            .urban
            .request(Method::GET, endpoint, options, Some(&self.session))
            .await?)
    }

    /// Region ids under the configured catalog parent.
    pub async fn list_regions(&self) -> PopframeResult<Vec<RegionId>> {
        let options = RequestOptions::new().with_query("parent_id", self.config.catalog_parent_id);
        let raw = self
            .urban_get("/api/v1/all_territories_without_geometry", &options)
            .await?;
        let records: Vec<TerritoryRecord> = decode(raw, "error during region list parsing")?;
        let regions: Vec<RegionId> = records
            .into_iter()
            .map(|r| RegionId::new(r.territory_id))
            .collect();
        tracing::debug!(count = regions.len(), parent_id = %self.config.catalog_parent_id, "Region catalog fetched");
        Ok(regions)
    }

    /// Boundary geometry of a region.
    ///
    /// # Errors
    ///
    /// Internal error carrying the raw geometry when it cannot be parsed.
    pub async fn get_region_boundary(&self, region_id: RegionId) -> PopframeResult<Geometry> {
        let raw = self
            .urban_get(&format!("/api/v1/territory/{}", region_id), &RequestOptions::new())
            .await?;
        let geometry = raw.get("geometry").cloned().unwrap_or(Value::Null);
        Geometry::from_json(&geometry).map_err(|e| {
            PopframeError::internal(
                format!("Error geometry parsing for borders of region {}", region_id),
                geometry,
                json!({ "error": e.to_string() }),
            )
        })
    }

    /// Settlement centres of a region, at every level below it.
    pub async fn get_settlements(&self, region_id: RegionId) -> PopframeResult<Vec<SettlementSite>> {
        let options = RequestOptions::new()
            .with_query("parent_id", region_id)
            .with_query("get_all_levels", true)
            .with_query("cities_only", true)
            .with_query("centers_only", true);
        let raw = self.urban_get("/api/v1/all_territories", &options).await?;
        let collection: TerritoryCollection = decode(raw, "error during settlements parsing")?;

        let mut sites = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            let territory_id = TerritoryId::new(feature.properties.territory_id);
            let geometry = Geometry::from_json(&feature.geometry).map_err(|e| {
                PopframeError::internal(
                    format!("Error geometry parsing for settlement {}", territory_id),
                    feature.geometry.clone(),
                    json!({ "error": e.to_string() }),
                )
            })?;
            sites.push(SettlementSite {
                territory_id,
                name: feature.properties.name,
                geometry,
            });
        }

        if sites.is_empty() {
            tracing::info!(%region_id, "No settlements found");
        }
        Ok(sites)
    }

    /// Population per territory, fetched in fixed-size concurrent batches.
    ///
    /// A batch is awaited in full before the next one is issued. Territories
    /// without an indicator value count as 0; non-positive populations are
    /// left out of the result.
    pub async fn get_population(&self, ids: &[TerritoryId]) -> PopframeResult<HashMap<TerritoryId, i64>> {
        let mut population = HashMap::with_capacity(ids.len());
        for (batch_no, batch) in ids.chunks(self.config.population_batch_size).enumerate() {
            let results = join_all(batch.iter().map(|id| self.fetch_population(*id))).await;
            for (id, result) in batch.iter().zip(results) {
                let value = result?;
                if value > 0 {
                    population.insert(*id, value);
                }
            }
            tracing::debug!(batch = batch_no, size = batch.len(), "Population batch fetched");
        }
        Ok(population)
    }

    async fn fetch_population(&self, territory_id: TerritoryId) -> PopframeResult<i64> {
        let options = RequestOptions::new().with_query("indicator_value", self.config.population_indicator_id);
        let raw = self
            .urban_get(&format!("/api/v1/territory/{}/indicator_values", territory_id), &options)
            .await?;
        population_value(&raw).ok_or_else(|| {
            PopframeError::internal(
                "error during population data retrieval",
                json!({ "territory_id": territory_id, "response": raw }),
                Value::Null,
            )
        })
    }

    /// Travel-time matrix of a region.
    ///
    /// # Errors
    ///
    /// NotFound when the matrix is empty; Internal when the payload cannot
    /// be shaped into a square table.
    pub async fn get_matrix(&self, region_id: RegionId, mode: GraphType) -> PopframeResult<AccessibilityMatrix> {
        let options = RequestOptions::new().with_query("graph_type", mode);
        let raw = self
            .transport
            .request(
                Method::GET,
                &format!("/{}/get_matrix", region_id),
                &options,
                Some(&self.session),
            )
            .await?;

        let payload: MatrixPayload = decode(raw, "error during matrix parsing")?;
        if payload.values.is_empty() {
            return Err(PopframeError::not_found(
                format!("matrix for region {} not found", region_id),
                json!({ "region_id": region_id, "graph_type": mode }),
            ));
        }

        let index = payload.index.into_iter().map(TerritoryId::new).collect();
        let columns = payload.columns.into_iter().map(TerritoryId::new).collect();
        AccessibilityMatrix::new(index, columns, payload.values).map_err(|e| {
            PopframeError::internal(
                "error during matrix parsing",
                json!({ "region_id": region_id, "graph_type": mode }),
                json!({ "error": e.to_string() }),
            )
        })
    }

    /// Write a computed indicator value back to the indicator service.
    pub async fn put_indicator_value(&self, value: &IndicatorValue) -> PopframeResult<Value> {
        let body = serde_json::to_value(value).map_err(|e| {
            PopframeError::internal(
                "failed to encode indicator value",
                json!({ "territory_id": value.territory_id }),
                json!({ "error": e.to_string() }),
            )
        })?;
        let options = RequestOptions::new().with_body(body);
        let response = self
            .urban
            .request(Method::PUT, "/api/v1/indicator_value", &options, Some(&self.session))
            .await?;
        tracing::info!(
            indicator_id = value.indicator_id,
            territory_id = %value.territory_id,
            "Indicator value written"
        );
        Ok(response)
    }
}

/// First indicator entry's value; an empty sequence means 0. Returns `None`
/// for anything that is not a sequence of `{value}` objects.
fn population_value(raw: &Value) -> Option<i64> {
    let entries = raw.as_array()?;
    let Some(first) = entries.first() else {
        return Some(0);
    };
    match first.get("value")? {
        Value::Null => Some(0),
        Value::Number(n) => n.as_f64().map(|v| v.round() as i64),
        _ => None,
    }
}

fn decode<T: DeserializeOwned>(raw: Value, message: &str) -> PopframeResult<T> {
    serde_json::from_value(raw.clone())
        .map_err(|e| PopframeError::internal(message, raw, json!({ "error": e.to_string() })))
}

#[async_trait]
impl RegionDataSource for RemoteDataGateway {
    async fn list_regions(&self) -> PopframeResult<Vec<RegionId>> {
        RemoteDataGateway::list_regions(self).await
    }

    async fn get_region_boundary(&self, region_id: RegionId) -> PopframeResult<Geometry> {
        RemoteDataGateway::get_region_boundary(self, region_id).await
    }

    async fn get_settlements(&self, region_id: RegionId) -> PopframeResult<Vec<SettlementSite>> {
        RemoteDataGateway::get_settlements(self, region_id).await
    }

    async fn get_population(&self, ids: &[TerritoryId]) -> PopframeResult<HashMap<TerritoryId, i64>> {
        RemoteDataGateway::get_population(self, ids).await
    }

    async fn get_matrix(&self, region_id: RegionId, mode: GraphType) -> PopframeResult<AccessibilityMatrix> {
        RemoteDataGateway::get_matrix(self, region_id, mode).await
    }
}
