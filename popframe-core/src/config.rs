//! Configuration types
//!
//! Each component receives its section by reference at construction time.
//! Sections deserialize with defaults so a config file only has to name
//! what it overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, PopframeError, PopframeResult};
use crate::{GraphType, RegionId};

/// Policy for the reset-by-peer retry loop in the HTTP client wrapper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Upper bound on transient retries per request. `None` retries until a
    /// different outcome appears.
    pub max_transient_retries: Option<u32>,
    /// Pause between transient retries, in milliseconds.
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Upstream service endpoints and fetch parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Territory catalog / indicator service base URL.
    pub urban_api_url: String,
    /// Accessibility matrix service base URL.
    pub transport_api_url: String,
    /// Parent territory whose children form the region catalog.
    pub catalog_parent_id: RegionId,
    /// Indicator holding settlement population.
    pub population_indicator_id: i64,
    /// Concurrent population requests per batch.
    pub population_batch_size: usize,
    pub graph_type: GraphType,
    /// Per-request timeout in seconds; unset keeps the transport default.
    pub request_timeout_secs: Option<u64>,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            urban_api_url: String::new(),
            transport_api_url: String::new(),
            catalog_parent_id: RegionId::new(12639),
            population_indicator_id: 1,
            population_batch_size: 15,
            graph_type: GraphType::Car,
            request_timeout_secs: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> PopframeResult<()> {
        require_url("urban_api_url", &self.urban_api_url)?;
        require_url("transport_api_url", &self.transport_api_url)?;

        if self.population_batch_size == 0 {
            return Err(invalid(
                "population_batch_size",
                self.population_batch_size,
                "population_batch_size must be greater than 0",
            ));
        }

        if self.request_timeout_secs == Some(0) {
            return Err(invalid(
                "request_timeout_secs",
                0,
                "request_timeout_secs must be positive when set",
            ));
        }

        Ok(())
    }
}

/// Artifact cache location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("cache"),
        }
    }
}

impl CacheConfig {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory holding primary model artifacts.
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// Directory holding derived layers.
    pub fn layers_dir(&self) -> PathBuf {
        self.root.join("layers")
    }

    pub fn validate(&self) -> PopframeResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(PopframeError::Config(ConfigError::MissingRequired {
                field: "cache.root".to_string(),
            }));
        }
        Ok(())
    }
}

/// Pipeline behaviour of the model orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Regions rebuilt concurrently by `rebuild_all`.
    pub rebuild_group_size: usize,
    /// Known-bad regions skipped by bulk rebuilds and reconciliation.
    pub excluded_regions: Vec<RegionId>,
    /// Dataset name used in derived layer file names and publishing.
    pub layer_name: String,
    /// Publisher workspace for derived layers.
    pub workspace: String,
    /// Travel-time threshold (minutes) for agglomeration membership.
    pub agglomeration_time_min: u32,
    /// Build missing catalog regions in the background at startup.
    pub reconcile_on_startup: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            rebuild_group_size: 5,
            excluded_regions: vec![RegionId::new(3268), RegionId::new(3138)],
            layer_name: "popframe".to_string(),
            workspace: "popframe".to_string(),
            agglomeration_time_min: 80,
            reconcile_on_startup: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn is_excluded(&self, region_id: RegionId) -> bool {
        self.excluded_regions.contains(&region_id)
    }

    pub fn validate(&self) -> PopframeResult<()> {
        if self.rebuild_group_size == 0 {
            return Err(invalid(
                "rebuild_group_size",
                self.rebuild_group_size,
                "rebuild_group_size must be greater than 0",
            ));
        }

        // the cache parses file names by splitting on '_' and '.'
        if self.layer_name.is_empty()
            || self.layer_name.contains('_')
            || self.layer_name.contains('.')
            || self.layer_name.contains('/')
        {
            return Err(invalid(
                "layer_name",
                &self.layer_name,
                "layer_name must be non-empty and must not contain '_', '.' or '/'",
            ));
        }

        if self.workspace.trim().is_empty() {
            return Err(PopframeError::Config(ConfigError::MissingRequired {
                field: "workspace".to_string(),
            }));
        }

        if self.agglomeration_time_min < 50 {
            return Err(invalid(
                "agglomeration_time_min",
                self.agglomeration_time_min,
                "agglomeration_time_min must be at least 50",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> PopframeError {
    PopframeError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn require_url(field: &str, value: &str) -> PopframeResult<()> {
    if value.trim().is_empty() {
        return Err(PopframeError::Config(ConfigError::MissingRequired {
            field: field.to_string(),
        }));
    }
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(invalid(field, value, "must be an http(s) URL"));
    }
    Ok(())
}
