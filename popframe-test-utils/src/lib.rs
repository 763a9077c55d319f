//! PopFrame Test Utilities
//!
//! Shared test infrastructure for the PopFrame workspace:
//! - Fakes for the data source, model builder and layer publisher
//! - Proptest generators for region inputs
//! - Fixtures for common scenarios
//! - Assertions on the error taxonomy

pub use popframe_core::{
    AccessibilityMatrix, DerivedLayers, Feature, FeatureCollection, Geometry, GraphType,
    LayerKind, ModelBuilder, OrchestratorConfig, PopframeError, PopframeResult, RegionId,
    RegionInputs, SettlementSite, TerritoryId, ValidationError,
};
pub use popframe_gateway::RegionDataSource;
pub use popframe_models::{LayerDescriptor, LayerMetadata, LayerPublisher};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};

// ============================================================================
// FAKE DATA SOURCE
// ============================================================================

/// Upstream data of one region as served by [`FakeDataSource`].
#[derive(Debug, Clone)]
pub struct RegionFixture {
    pub boundary: Geometry,
    pub sites: Vec<SettlementSite>,
    pub matrix: AccessibilityMatrix,
}

/// Number of calls per data source operation.
#[derive(Debug, Default)]
pub struct FetchCounters {
    pub catalog: AtomicUsize,
    pub boundary: AtomicUsize,
    pub settlements: AtomicUsize,
    pub population: AtomicUsize,
    pub matrix: AtomicUsize,
}

impl FetchCounters {
    /// Region-level fetches (everything except the catalog listing).
    pub fn region_fetches(&self) -> usize {
        self.boundary.load(Ordering::SeqCst)
            + self.settlements.load(Ordering::SeqCst)
            + self.population.load(Ordering::SeqCst)
            + self.matrix.load(Ordering::SeqCst)
    }

    pub fn boundary_calls(&self) -> usize {
        self.boundary.load(Ordering::SeqCst)
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog.load(Ordering::SeqCst)
    }
}

/// In-memory stand-in for the remote services.
#[derive(Debug, Default)]
pub struct FakeDataSource {
    catalog: Vec<RegionId>,
    regions: HashMap<RegionId, RegionFixture>,
    population: HashMap<TerritoryId, i64>,
    latency: Duration,
    failures: Mutex<HashMap<RegionId, PopframeError>>,
    catalog_failure: Mutex<Option<PopframeError>>,
    pub calls: FetchCounters,
}

impl FakeDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region to the catalog with its upstream data.
    pub fn with_region(mut self, region_id: RegionId, fixture: RegionFixture) -> Self {
        self.catalog.push(region_id);
        self.regions.insert(region_id, fixture);
        self
    }

    /// List a region in the catalog without serving any data for it.
    pub fn with_catalog_entry(mut self, region_id: RegionId) -> Self {
        self.catalog.push(region_id);
        self
    }

    pub fn with_population(mut self, entries: impl IntoIterator<Item = (i64, i64)>) -> Self {
        self.population
            .extend(entries.into_iter().map(|(id, value)| (TerritoryId::new(id), value)));
        self
    }

    /// Delay every boundary fetch, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every region-level fetch of `region_id` fail with `error`.
    pub fn fail_region(&self, region_id: RegionId, error: PopframeError) {
        lock(&self.failures).insert(region_id, error);
    }

    pub fn heal_region(&self, region_id: RegionId) {
        lock(&self.failures).remove(&region_id);
    }

    pub fn fail_catalog(&self, error: PopframeError) {
        *lock(&self.catalog_failure) = Some(error);
    }

    fn fixture(&self, region_id: RegionId) -> PopframeResult<&RegionFixture> {
        if let Some(error) = lock(&self.failures).get(&region_id) {
            return Err(error.clone());
        }
        self.regions.get(&region_id).ok_or_else(|| {
            PopframeError::not_found(
                format!("region {} not in fake catalog", region_id),
                json!({ "region_id": region_id }),
            )
        })
    }
}

#[async_trait]
impl RegionDataSource for FakeDataSource {
    async fn list_regions(&self) -> PopframeResult<Vec<RegionId>> {
        self.calls.catalog.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.catalog_failure).clone() {
            return Err(error);
        }
        Ok(self.catalog.clone())
    }

    async fn get_region_boundary(&self, region_id: RegionId) -> PopframeResult<Geometry> {
        self.calls.boundary.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.fixture(region_id)?.boundary.clone())
    }

    async fn get_settlements(&self, region_id: RegionId) -> PopframeResult<Vec<SettlementSite>> {
        self.calls.settlements.fetch_add(1, Ordering::SeqCst);
        Ok(self.fixture(region_id)?.sites.clone())
    }

    async fn get_population(&self, ids: &[TerritoryId]) -> PopframeResult<HashMap<TerritoryId, i64>> {
        self.calls.population.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .filter_map(|id| {
                let value = self.population.get(id).copied().unwrap_or(0);
                (value > 0).then_some((*id, value))
            })
            .collect())
    }

    async fn get_matrix(&self, region_id: RegionId, _mode: GraphType) -> PopframeResult<AccessibilityMatrix> {
        self.calls.matrix.fetch_add(1, Ordering::SeqCst);
        Ok(self.fixture(region_id)?.matrix.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// FAKE BUILDER
// ============================================================================

/// Artifact of [`FakeBuilder`]: a record of what it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeArtifact {
    pub region_id: RegionId,
    pub settlement_ids: Vec<TerritoryId>,
    pub populations: Vec<u64>,
    pub matrix_ids: Vec<TerritoryId>,
    pub build_no: usize,
}

/// Builder that records its inputs and can be told to fail.
#[derive(Debug, Default)]
pub struct FakeBuilder {
    builds: AtomicUsize,
    derives: AtomicUsize,
    failing_regions: Mutex<HashSet<RegionId>>,
    fail_derive: AtomicBool,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn derives(&self) -> usize {
        self.derives.load(Ordering::SeqCst)
    }

    pub fn fail_build_for(&self, region_id: RegionId) {
        lock(&self.failing_regions).insert(region_id);
    }

    pub fn set_fail_derive(&self, fail: bool) {
        self.fail_derive.store(fail, Ordering::SeqCst);
    }
}

impl ModelBuilder for FakeBuilder {
    type Artifact = FakeArtifact;

    fn build(&self, inputs: RegionInputs) -> Result<FakeArtifact, ValidationError> {
        if lock(&self.failing_regions).contains(&inputs.region_id) {
            return Err(ValidationError::BuildFailed {
                reason: format!("scripted failure for region {}", inputs.region_id),
            });
        }
        let build_no = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeArtifact {
            region_id: inputs.region_id,
            settlement_ids: inputs.settlements.iter().map(|s| s.territory_id).collect(),
            populations: inputs.settlements.iter().map(|s| s.population).collect(),
            matrix_ids: inputs.matrix.index().to_vec(),
            build_no,
        })
    }

    fn derive(&self, artifact: &FakeArtifact) -> Result<DerivedLayers, ValidationError> {
        self.derives.fetch_add(1, Ordering::SeqCst);
        if self.fail_derive.load(Ordering::SeqCst) {
            return Err(ValidationError::DeriveFailed {
                reason: "scripted derive failure".to_string(),
            });
        }
        let features = artifact
            .settlement_ids
            .iter()
            .map(|id| {
                let mut properties = Map::new();
                properties.insert("territory_id".into(), json!(id));
                Feature::new(Geometry::Point(vec![id.get() as f64, 0.0]), properties)
            })
            .collect();
        let mut layers = DerivedLayers::new();
        layers.insert(LayerKind::Settlements, FeatureCollection::new(features));
        layers.insert(LayerKind::AgglomerationBoundary, FeatureCollection::default());
        Ok(layers)
    }
}

// ============================================================================
// RECORDING PUBLISHER
// ============================================================================

/// Publisher that remembers every upload and serves descriptors for them.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    uploads: Mutex<Vec<(PathBuf, LayerMetadata)>>,
    published: Mutex<HashMap<(RegionId, LayerKind), Vec<String>>>,
    fail_uploads: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, LayerMetadata)> {
        lock(&self.uploads).clone()
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Register an extra search match, e.g. to provoke a conflict.
    pub fn add_href(&self, region_id: RegionId, kind: LayerKind, href: impl Into<String>) {
        lock(&self.published)
            .entry((region_id, kind))
            .or_default()
            .push(href.into());
    }

    pub fn href_for(metadata: &LayerMetadata) -> String {
        format!(
            "http://maps.test:8080/geoserver/rest/workspaces/{}/layers/{}-{}-{}.json",
            metadata.workspace, metadata.dataset, metadata.region_id, metadata.kind
        )
    }
}

#[async_trait]
impl LayerPublisher for RecordingPublisher {
    async fn upload(&self, file: &Path, metadata: &LayerMetadata) -> PopframeResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(PopframeError::internal(
                "scripted upload failure",
                json!({ "file": file.display().to_string() }),
                json!({}),
            ));
        }
        lock(&self.uploads).push((file.to_path_buf(), metadata.clone()));
        lock(&self.published).insert(
            (metadata.region_id, metadata.kind),
            vec![Self::href_for(metadata)],
        );
        Ok(())
    }

    async fn describe(
        &self,
        _workspace: &str,
        _dataset: &str,
        region_id: RegionId,
        kind: LayerKind,
    ) -> PopframeResult<LayerDescriptor> {
        let hrefs = lock(&self.published)
            .get(&(region_id, kind))
            .cloned()
            .unwrap_or_default();
        LayerDescriptor::from_matches(&hrefs, region_id, kind)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for region inputs.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_region_id() -> impl Strategy<Value = RegionId> {
        (1i64..100_000).prop_map(RegionId::new)
    }

    /// Population values, including the zero and negative ones upstream
    /// sometimes reports.
    pub fn arb_population() -> impl Strategy<Value = i64> {
        prop_oneof![Just(0i64), -100i64..0, 1i64..5_000_000]
    }

    /// Distinct territory ids.
    pub fn arb_territory_ids(max: usize) -> impl Strategy<Value = Vec<TerritoryId>> {
        prop::collection::btree_set(1i64..10_000, 1..=max)
            .prop_map(|ids| ids.into_iter().map(TerritoryId::new).collect())
    }

    /// A square matrix over `ids` with non-negative travel times.
    pub fn arb_matrix(ids: Vec<TerritoryId>) -> impl Strategy<Value = AccessibilityMatrix> {
        let n = ids.len();
        prop::collection::vec(prop::collection::vec(0.0f64..300.0, n), n).prop_map(move |values| {
            AccessibilityMatrix::new(ids.clone(), ids.clone(), values)
                .unwrap_or_else(|e| panic!("generated matrix must be square: {}", e))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use popframe_core::CacheConfig;
    use popframe_storage::ArtifactCache;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Closed axis-aligned square polygon.
    pub fn square(x: f64, y: f64, size: f64) -> Geometry {
        Geometry::Polygon(vec![vec![
            vec![x, y],
            vec![x + size, y],
            vec![x + size, y + size],
            vec![x, y + size],
            vec![x, y],
        ]])
    }

    pub fn site(id: i64) -> SettlementSite {
        SettlementSite {
            territory_id: TerritoryId::new(id),
            name: Some(format!("settlement-{}", id)),
            geometry: Geometry::Point(vec![30.0 + id as f64 / 100.0, 60.0]),
        }
    }

    /// Travel time between `ids[i]` and `ids[j]` is `10 * |i - j|` minutes.
    pub fn linear_matrix(ids: &[i64]) -> AccessibilityMatrix {
        let ids: Vec<TerritoryId> = ids.iter().copied().map(TerritoryId::new).collect();
        let values = (0..ids.len())
            .map(|i| (0..ids.len()).map(|j| 10.0 * (i as f64 - j as f64).abs()).collect())
            .collect();
        AccessibilityMatrix::new(ids.clone(), ids, values)
            .unwrap_or_else(|e| panic!("linear matrix must be square: {}", e))
    }

    /// A region whose settlements and matrix both cover `ids`.
    pub fn region_fixture(ids: &[i64]) -> RegionFixture {
        RegionFixture {
            boundary: square(29.0, 59.0, 3.0),
            sites: ids.iter().copied().map(site).collect(),
            matrix: linear_matrix(ids),
        }
    }

    /// Region 42 with settlements 1, 2, 3 of population 100, 0 and 50.
    pub fn region_42_source() -> FakeDataSource {
        FakeDataSource::new()
            .with_region(RegionId::new(42), region_fixture(&[1, 2, 3]))
            .with_population([(1, 100), (2, 0), (3, 50)])
    }

    /// A catalog of `regions`, each with three populated settlements.
    pub fn catalog_source(regions: &[i64]) -> FakeDataSource {
        regions.iter().fold(FakeDataSource::new(), |source, region| {
            let ids = [region * 10 + 1, region * 10 + 2, region * 10 + 3];
            source
                .with_region(RegionId::new(*region), region_fixture(&ids))
                .with_population(ids.iter().map(|id| (*id, 1_000 * id)))
        })
    }

    /// Orchestrator config with no excluded regions and small groups.
    pub fn orchestrator_config() -> OrchestratorConfig {
        OrchestratorConfig {
            rebuild_group_size: 2,
            excluded_regions: Vec::new(),
            ..Default::default()
        }
    }

    /// Create a cache in a fresh temporary directory. Keep the `TempDir`
    /// alive for as long as the cache is used.
    pub async fn test_cache() -> (Arc<ArtifactCache>, TempDir) {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("temp dir: {}", e));
        let cache = ArtifactCache::open(&CacheConfig::new(dir.path()))
            .await
            .unwrap_or_else(|e| panic!("open cache: {}", e));
        (Arc::new(cache), dir)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on the error taxonomy.

    use super::*;

    /// Assert that a result failed with the given HTTP status.
    #[track_caller]
    pub fn assert_status<T: std::fmt::Debug>(result: &PopframeResult<T>, status: u16) {
        match result {
            Err(e) => assert_eq!(e.status_code(), status, "unexpected error: {:?}", e),
            Ok(value) => panic!("Expected error with status {}, got Ok: {:?}", status, value),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &PopframeResult<T>) {
        match result {
            Err(PopframeError::NotFound(_)) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert an Internal error with the given message.
    #[track_caller]
    pub fn assert_internal<T: std::fmt::Debug>(result: &PopframeResult<T>, message: &str) {
        match result {
            Err(PopframeError::Internal(diagnostic)) => assert_eq!(diagnostic.message, message),
            other => panic!("Expected Internal error '{}', got: {:?}", message, other),
        }
    }
}
