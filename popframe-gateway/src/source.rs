//! Region data source abstraction.

use std::collections::HashMap;

use async_trait::async_trait;
use popframe_core::{
    AccessibilityMatrix, Geometry, GraphType, PopframeResult, RegionId, SettlementSite, TerritoryId,
};

/// Everything the orchestrator fetches to build one region's model.
///
/// Implemented by [`crate::RemoteDataGateway`] against the live services
/// and by in-memory fakes in tests.
#[async_trait]
pub trait RegionDataSource: Send + Sync {
    /// Region ids of the territory catalog, in catalog order.
    async fn list_regions(&self) -> PopframeResult<Vec<RegionId>>;

    /// Boundary geometry of a region.
    async fn get_region_boundary(&self, region_id: RegionId) -> PopframeResult<Geometry>;

    /// Settlement centres nested in a region.
    async fn get_settlements(&self, region_id: RegionId) -> PopframeResult<Vec<SettlementSite>>;

    /// Population per territory. Only positive populations are returned.
    async fn get_population(&self, ids: &[TerritoryId]) -> PopframeResult<HashMap<TerritoryId, i64>>;

    /// Travel-time matrix of a region for the given transport mode.
    async fn get_matrix(&self, region_id: RegionId, mode: GraphType) -> PopframeResult<AccessibilityMatrix>;
}
