//! Error types for the webhook service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors that reject a webhook delivery before any workflow runs.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature header missing, malformed or not matching the body
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] SignatureError),

    /// Body is not valid JSON or lacks required fields
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl WebhookError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "status": "error",
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Reasons a webhook signature is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// No `X-Hub-Signature-256` header
    #[error("missing signature header")]
    Missing,

    /// Header present but not `sha256=<hex>`
    #[error("malformed signature header")]
    Malformed,

    /// Digest does not match the body
    #[error("signature mismatch")]
    Mismatch,
}

/// Failures of an external command (claude, gh, git).
#[derive(Debug, Error)]
pub enum ToolError {
    /// The process could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its bounded wait and was killed
    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    /// The process exited unsuccessfully
    #[error("{program} exited with status {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The process succeeded but its output was unusable
    #[error("{program} returned unusable output: {reason}")]
    InvalidOutput { program: String, reason: String },

    /// Filesystem error while preparing a working directory
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors, surfaced once at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty
    #[error("{0} is not set")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}
