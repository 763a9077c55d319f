//! Shared handler state.

use std::sync::Arc;
use std::time::Instant;

use popframe_models::{ModelOrchestrator, SnapshotBuilder};

/// Orchestrator served by this binary.
pub type Orchestrator = ModelOrchestrator<SnapshotBuilder>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            start_time: Instant::now(),
        }
    }
}
