//! PopFrame Core - Shared Types
//!
//! Data model for the per-region model pipeline: identifiers, geometry,
//! settlements, accessibility matrices, derived layers, the error taxonomy,
//! pipeline configuration and the model builder capability.
//!
//! This crate performs no I/O. The gateway, storage and orchestration
//! crates all depend on it.

pub mod builder;
pub mod config;
pub mod error;
pub mod geometry;
pub mod identity;
pub mod layer;
pub mod matrix;
pub mod settlement;

pub use builder::{ModelBuilder, RegionInputs};
pub use config::{CacheConfig, GatewayConfig, OrchestratorConfig, RetryPolicy};
pub use error::{
    ConfigError, Diagnostic, GatewayError, PopframeError, PopframeResult, StorageError,
    ValidationError,
};
pub use geometry::{Feature, FeatureCollection, Geometry, Position};
pub use identity::{RegionId, TerritoryId, Timestamp};
pub use layer::{DerivedLayer, DerivedLayers, LayerKind};
pub use matrix::{AccessibilityMatrix, GraphType};
pub use settlement::{align_settlements, Settlement, SettlementLevel, SettlementSite};
