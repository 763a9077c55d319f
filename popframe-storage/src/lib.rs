//! PopFrame Storage - Filesystem Artifact Cache
//!
//! Region model artifacts and their derived layers live on durable storage,
//! one directory per artifact kind. File names are the composite cache key.
//! The cache itself holds no locks: the orchestrator guarantees at most one
//! writer per region.

pub mod cache;

pub use cache::{ArtifactCache, ArtifactKey, CacheStats, LayerKey};
