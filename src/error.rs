//! HTTP-facing error taxonomy.
//!
//! Every error leaves the proxy as JSON carrying at least `error` (message)
//! and `error_type` (stable kind label).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

use crate::forward::ForwardError;
use crate::session::SessionError;

/// Errors returned by the HTTP surface.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed payload, method, URL or header.
    #[error("{0}")]
    Validation(String),

    /// No session id on a gated request.
    #[error("Session ID is missing. Please provide a valid session ID.")]
    MissingSession,

    /// Session id unknown or idle past the timeout.
    #[error("Invalid or expired session ID. Please provide a valid session ID.")]
    InvalidSession,

    /// Attempt to act on a session other than the caller's.
    #[error("{0}")]
    Forbidden(String),

    /// No route for the path.
    #[error("No route for {0}")]
    NotFound(String),

    /// Outbound call failed.
    #[error(transparent)]
    Forward(#[from] ForwardError),

    /// Catch-all.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::MissingSession | Self::InvalidSession => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forward(e) => e.status_code(),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable label reported as `error_type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::MissingSession => "MissingSession",
            Self::InvalidSession => "InvalidSession",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::Forward(e) => e.kind(),
            Self::Internal(_) => "InternalError",
        }
    }

    /// JSON body for this error.
    pub fn body(&self) -> Value {
        let mut body = json!({
            "error": self.to_string(),
            "error_type": self.kind(),
        });
        if let Self::Forward(e) = self {
            body["url"] = json!(e.url());
            body["method"] = json!(e.method());
            if let Some(timeout) = e.timeout_secs() {
                body["timeout"] = json!(timeout);
            }
        }
        body
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound | SessionError::Expired => ApiError::InvalidSession,
            SessionError::Client(e) => ApiError::Internal(format!("Failed to build session client: {e}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
