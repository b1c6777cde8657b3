use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced by the dispatch core and the execution agent.
///
/// Every variant maps to exactly one HTTP status through [`ApiError::status`];
/// the dispatcher never inspects anything else when building an error response.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing app name")]
    MissingAppName,
    #[error("App not found")]
    AppNotFound,
    #[error("Route not found")]
    RouteNotFound,
    #[error("Call not found")]
    CallNotFound,
    #[error("Invalid payload")]
    InvalidPayload,
    #[error("Request content too big")]
    RequestContentTooBig,
    #[error("Timed out - server too busy")]
    CallTimeoutServerBusy,
    #[error("Timed out")]
    CallTimeout,
    #[error("Call stopped")]
    CallStopped,
    #[error("Async queue is full")]
    QueueFull,
    #[error("Function failed: {0}")]
    FunctionFailed(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Status used when the caller went away before the call finished.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

impl ApiError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            ApiError::MissingAppName | ApiError::InvalidPayload => 400,
            ApiError::AppNotFound | ApiError::RouteNotFound | ApiError::CallNotFound => 404,
            ApiError::RequestContentTooBig => 413,
            ApiError::CallStopped => STATUS_CLIENT_CLOSED_REQUEST,
            ApiError::FunctionFailed(_) => 502,
            ApiError::CallTimeoutServerBusy | ApiError::QueueFull => 503,
            ApiError::CallTimeout => 504,
            ApiError::Internal(_) => 500,
        }
    }

    /// Admission-control rejections that carry the wait diagnostic header.
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, ApiError::CallTimeoutServerBusy | ApiError::CallTimeout)
    }

    /// Message shown to the caller. Internal errors are never echoed back.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// JSON body written by the generic error responder.
    #[must_use]
    pub fn body(&self) -> Value {
        json!({ "error": { "message": self.public_message() } })
    }
}
