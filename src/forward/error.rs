//! Outbound call failures.

use axum::http::StatusCode;
use thiserror::Error;

/// Failure of a single proxied call, with the target for diagnostics.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Timeout while making request to {url} after {timeout}s")]
    Timeout { url: String, method: String, timeout: u64 },

    #[error("Connection error while forwarding request: {source}")]
    Connection {
        url: String,
        method: String,
        source: reqwest::Error,
    },

    #[error("HTTP error while forwarding request: {source}")]
    Protocol {
        url: String,
        method: String,
        source: reqwest::Error,
    },

    #[error("Exceeded {limit} redirects while forwarding request to {url}")]
    TooManyRedirects { url: String, method: String, limit: usize },

    #[error("Unexpected error while forwarding request: {message}")]
    Unexpected {
        url: String,
        method: String,
        kind: &'static str,
        message: String,
    },
}

impl ForwardError {
    /// Classify a client error for the given target.
    pub fn from_reqwest(err: reqwest::Error, url: &str, method: &str, timeout: u64) -> Self {
        let (url, method) = (url.to_string(), method.to_string());
        if err.is_timeout() {
            ForwardError::Timeout { url, method, timeout }
        } else if err.is_connect() {
            ForwardError::Connection { url, method, source: err }
        } else if err.is_request() || err.is_body() || err.is_decode() {
            ForwardError::Protocol { url, method, source: err }
        } else {
            ForwardError::Unexpected {
                url,
                method,
                kind: "RequestError",
                message: err.to_string(),
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::Connection { .. } => StatusCode::BAD_GATEWAY,
            Self::Protocol { .. } | Self::TooManyRedirects { .. } | Self::Unexpected { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TimeoutError",
            Self::Connection { .. } => "ConnectionError",
            Self::Protocol { .. } => "HTTPError",
            Self::TooManyRedirects { .. } => "TooManyRedirects",
            Self::Unexpected { kind, .. } => kind,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. }
            | Self::Connection { url, .. }
            | Self::Protocol { url, .. }
            | Self::TooManyRedirects { url, .. }
            | Self::Unexpected { url, .. } => url,
        }
    }

    pub fn method(&self) -> &str {
        match self {
            Self::Timeout { method, .. }
            | Self::Connection { method, .. }
            | Self::Protocol { method, .. }
            | Self::TooManyRedirects { method, .. }
            | Self::Unexpected { method, .. } => method,
        }
    }

    /// Configured timeout, for timeout errors only.
    pub fn timeout_secs(&self) -> Option<u64> {
        match self {
            Self::Timeout { timeout, .. } => Some(*timeout),
            _ => None,
        }
    }
}
