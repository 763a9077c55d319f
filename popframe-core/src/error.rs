//! Error types for PopFrame operations

use crate::{RegionId, TerritoryId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Failures talking to the upstream HTTP services.
///
/// Transient upstream resets never surface here; the client wrapper retries
/// them internally.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// Upstream answered with a non-success status.
    #[error("{message}: {url} responded with status {status}")]
    Http {
        status: u16,
        message: String,
        url: String,
        body: Value,
    },

    /// The request never produced a response.
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// A success response whose body is not JSON.
    #[error("Response from {url} is not valid JSON: {reason}")]
    Decode {
        url: String,
        reason: String,
        body: String,
    },
}

/// Artifact cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to cache artifact for region {region_id} under {key}: {reason}")]
    SaveFailed {
        region_id: RegionId,
        key: String,
        reason: String,
        available: Vec<RegionId>,
    },

    #[error("Failed to load artifact from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Failed to delete {path}: {reason}")]
    DeleteFailed { path: String, reason: String },

    #[error("Failed to enumerate {path}: {reason}")]
    EnumerateFailed { path: String, reason: String },

    #[error("Failed to prepare cache directory {path}: {reason}")]
    InitFailed { path: String, reason: String },
}

/// Input validation and model construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("Accessibility matrix has an invalid shape: {reason}")]
    MatrixShape { reason: String },

    #[error("Accessibility matrix is missing territories {ids:?}")]
    MissingMatrixIds { ids: Vec<TerritoryId> },

    #[error("No populated settlements for region {region_id}")]
    EmptySettlements { region_id: RegionId },

    #[error("Model construction failed: {reason}")]
    BuildFailed { reason: String },

    #[error("Layer derivation failed: {reason}")]
    DeriveFailed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Operator-facing diagnostic payload: what failed, on which input, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub input: Value,
    pub detail: Value,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, input: Value, detail: Value) -> Self {
        Self {
            message: message.into(),
            input,
            detail,
        }
    }
}

/// Master error type for all PopFrame errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PopframeError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Not found: {}", .0.message)]
    NotFound(Diagnostic),

    #[error("Conflict: {}", .0.message)]
    Conflict(Diagnostic),

    #[error("Internal error: {}", .0.message)]
    Internal(Diagnostic),
}

impl PopframeError {
    pub fn not_found(message: impl Into<String>, input: Value) -> Self {
        Self::NotFound(Diagnostic::new(message, input, Value::Null))
    }

    pub fn conflict(message: impl Into<String>, input: Value, detail: Value) -> Self {
        Self::Conflict(Diagnostic::new(message, input, detail))
    }

    pub fn internal(message: impl Into<String>, input: Value, detail: Value) -> Self {
        Self::Internal(Diagnostic::new(message, input, detail))
    }

    /// HTTP status this error surfaces with.
    ///
    /// Upstream failures keep the upstream status; transport failures map to
    /// 502; everything that is not NotFound or Conflict is a 500.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Gateway(GatewayError::Http { status, .. }) => *status,
            Self::Gateway(GatewayError::Transport { .. }) => 502,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Gateway(GatewayError::Decode { .. })
            | Self::Storage(_)
            | Self::Validation(_)
            | Self::Config(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Short human message without the category prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Gateway(GatewayError::Http { message, .. }) => message.clone(),
            Self::NotFound(d) | Self::Conflict(d) | Self::Internal(d) => d.message.clone(),
            Self::Gateway(e) => e.to_string(),
            Self::Storage(e) => e.to_string(),
            Self::Validation(e) => e.to_string(),
            Self::Config(e) => e.to_string(),
        }
    }

    /// The offending input (URL, cache path, raw payload) for diagnostics.
    pub fn input(&self) -> Value {
        match self {
            Self::Gateway(GatewayError::Http { url, .. })
            | Self::Gateway(GatewayError::Transport { url, .. })
            | Self::Gateway(GatewayError::Decode { url, .. }) => Value::String(url.clone()),
            Self::Storage(StorageError::SaveFailed { key, .. }) => Value::String(key.clone()),
            Self::Storage(StorageError::LoadFailed { path, .. })
            | Self::Storage(StorageError::DeleteFailed { path, .. })
            | Self::Storage(StorageError::EnumerateFailed { path, .. })
            | Self::Storage(StorageError::InitFailed { path, .. }) => Value::String(path.clone()),
            Self::NotFound(d) | Self::Conflict(d) | Self::Internal(d) => d.input.clone(),
            Self::Validation(_) | Self::Config(_) => Value::Null,
        }
    }

    /// Detail map: upstream body, underlying error text, cache enumeration.
    pub fn detail(&self) -> Value {
        match self {
            Self::Gateway(GatewayError::Http { body, .. }) => body.clone(),
            Self::Gateway(GatewayError::Transport { reason, .. }) => json!({ "error": reason }),
            Self::Gateway(GatewayError::Decode { reason, body, .. }) => {
                json!({ "error": reason, "body": body })
            }
            Self::Storage(StorageError::SaveFailed {
                reason, available, ..
            }) => json!({ "error": reason, "available_files": available }),
            Self::Storage(
                StorageError::LoadFailed { reason, .. }
                | StorageError::DeleteFailed { reason, .. }
                | StorageError::EnumerateFailed { reason, .. }
                | StorageError::InitFailed { reason, .. },
            ) => json!({ "error": reason }),
            Self::Validation(e) => json!({ "error": e.to_string() }),
            Self::Config(e) => json!({ "error": e.to_string() }),
            Self::NotFound(d) | Self::Conflict(d) | Self::Internal(d) => d.detail.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for PopFrame operations.
pub type PopframeResult<T> = Result<T, PopframeError>;

// =============================================================================
// TESTS
// =============================================================================
