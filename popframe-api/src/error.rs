//! Error Types for the PopFrame API
//!
//! Every failure leaves the service as the same JSON body:
//! `{status, code, message, input, details}`. The status follows the
//! pipeline's error taxonomy, so an upstream failure keeps the upstream's
//! own status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use popframe_core::{GatewayError, PopframeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error categories carried in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Path or query value could not be interpreted
    InvalidInput,

    /// Requested region, matrix or layer does not exist
    EntityNotFound,

    /// More than one candidate where exactly one was expected
    StateConflict,

    /// An upstream service answered with a failure status
    UpstreamError,

    /// An upstream service could not be reached or sent garbage
    UpstreamUnavailable,

    /// Region inputs could not produce a model
    ValidationFailed,

    /// Artifact cache I/O failed
    StorageError,

    /// Service configuration is invalid
    ConfigurationError,

    /// Any other server-side failure
    InternalError,
}

impl ErrorCode {
    /// Status used when the error itself does not carry one.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,
            ErrorCode::StateConflict => StatusCode::CONFLICT,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::UpstreamError
            | ErrorCode::ValidationFailed
            | ErrorCode::StorageError
            | ErrorCode::ConfigurationError
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// HTTP status of the response
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
    /// The offending input (request URL, cache key, region id)
    pub input: Value,
    /// Underlying error text and context
    pub details: Value,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
            input: Value::Null,
            details: Value::Null,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// HTTP status of this error; out-of-range values fall back to 500.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<PopframeError> for ApiError {
    fn from(err: PopframeError) -> Self {
        let code = match &err {
            PopframeError::Gateway(GatewayError::Http { .. }) => ErrorCode::UpstreamError,
            PopframeError::Gateway(_) => ErrorCode::UpstreamUnavailable,
            PopframeError::Storage(_) => ErrorCode::StorageError,
            PopframeError::Validation(_) => ErrorCode::ValidationFailed,
            PopframeError::Config(_) => ErrorCode::ConfigurationError,
            PopframeError::NotFound(_) => ErrorCode::EntityNotFound,
            PopframeError::Conflict(_) => ErrorCode::StateConflict,
            PopframeError::Internal(_) => ErrorCode::InternalError,
        };
        let status = err.status_code();
        if status >= 500 {
            tracing::error!(status, error = %err, detail = %err.detail(), "Request failed");
        }
        Self {
            status,
            code,
            message: err.message(),
            input: err.input(),
            details: err.detail(),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
