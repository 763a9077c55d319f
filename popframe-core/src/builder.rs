//! Domain model builder capability
//!
//! The analytical model itself is opaque to the pipeline. A builder turns
//! one region's aligned inputs into an artifact and derives secondary
//! layers from that artifact; the orchestrator only persists, reloads and
//! publishes what the builder returns.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ValidationError;
use crate::{AccessibilityMatrix, DerivedLayers, Geometry, RegionId, Settlement};

/// Inputs for one region, built fresh per computation and never persisted
/// directly.
///
/// `matrix` is already restricted to exactly the ids in `settlements`, in
/// the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionInputs {
    pub region_id: RegionId,
    pub boundary: Geometry,
    pub settlements: Vec<Settlement>,
    pub matrix: AccessibilityMatrix,
}

/// Injected model construction capability.
///
/// Both methods are synchronous CPU work; callers run them off the async
/// reactor.
pub trait ModelBuilder: Send + Sync + 'static {
    /// Serializable artifact type written to the cache.
    type Artifact: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Build the model artifact for a region.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when the inputs cannot produce a model.
    fn build(&self, inputs: RegionInputs) -> Result<Self::Artifact, ValidationError>;

    /// Derive the secondary layers (settlements, agglomerations) from a
    /// built artifact.
    fn derive(&self, artifact: &Self::Artifact) -> Result<DerivedLayers, ValidationError>;
}
