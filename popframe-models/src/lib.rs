//! PopFrame Models - Compute, Cache, Serve
//!
//! [`ModelOrchestrator`] drives the per-region pipeline: fetch inputs
//! through a [`popframe_gateway::RegionDataSource`], align settlements with
//! the accessibility matrix, run the injected [`popframe_core::ModelBuilder`],
//! persist the artifact in the [`popframe_storage::ArtifactCache`], then
//! refresh and publish the derived layers on a best-effort basis.
//!
//! Concurrent requests for one region share a single computation.

pub mod coalesce;
pub mod orchestrator;
pub mod publisher;
pub mod snapshot;

pub use coalesce::{BuildCoalescer, CoalescerStats};
pub use orchestrator::{ModelOrchestrator, RebuildReport, RegionFailure};
pub use publisher::{DisabledPublisher, LayerDescriptor, LayerMetadata, LayerPublisher};
pub use snapshot::{RegionSnapshot, SnapshotBuilder};
