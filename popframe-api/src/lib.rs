//! PopFrame API - HTTP Service
//!
//! Thin operational surface over the model orchestrator: trigger single and
//! bulk recomputation, list cached regions, evict a region, read back
//! derived layers and report health.
//!
//! Configuration comes from an optional TOML file plus environment
//! overrides; every error leaves the service as a structured JSON body.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ServerConfig, ServiceConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::{AppState, Orchestrator};
