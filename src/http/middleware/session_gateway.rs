//! Session gateway middleware.
//! Every request outside the public allow-list must carry a live session id.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::error::ApiError;
use crate::observability::metrics;
use crate::session::{short_id, SessionRecord, SessionStore};

/// Paths served without a session.
pub const PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/health-check",
    "/subscribe",
    "/docs",
    "/redoc",
    "/openapi.json",
    "/favicon.ico",
];

const PROCESS_TIME_HEADER: HeaderName = HeaderName::from_static("x-process-time");

/// Context attached to authenticated requests.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub id: String,
    pub record: Arc<SessionRecord>,
}

#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<SessionStore>,
    pub header_name: HeaderName,
}

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

pub async fn session_gateway(
    State(state): State<GatewayState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let path = req.uri().path().to_string();
    let method = req.method().to_string();

    let session_id = req
        .headers()
        .get(&state.header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    if !is_public_path(&path) {
        let Some(id) = session_id.as_deref() else {
            warn!(path = %path, "Rejected request without session id");
            metrics::record_auth_rejection("missing");
            return finish(&state, ApiError::MissingSession.into_response(), None, start);
        };

        match state.store.resolve(id) {
            Ok(record) => {
                tracing::debug!(session = %short_id(id), path = %path, "Session validated");
                req.extensions_mut().insert(SessionContext {
                    id: id.to_string(),
                    record,
                });
            }
            Err(e) => {
                warn!(session = %short_id(id), path = %path, reason = %e, "Rejected request with invalid session");
                metrics::record_auth_rejection("invalid");
                return finish(&state, ApiError::InvalidSession.into_response(), Some(id), start);
            }
        }
    }

    let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(path = %path, method = %method, error = %message, "Handler panicked");
            internal_error(&message, session_id.as_deref(), &path, &method, start)
        }
    };

    finish(&state, response, session_id.as_deref(), start)
}

fn internal_error(message: &str, session_id: Option<&str>, path: &str, method: &str, start: Instant) -> Response {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let body = json!({
        "error": format!("Unexpected error while processing the request: {message}"),
        "error_type": "InternalError",
        "session_id": session_id,
        "path": path,
        "method": method,
        "process_time": start.elapsed().as_secs_f64(),
        "timestamp": timestamp,
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Stamp the session id (unless the handler already did) and processing time.
fn finish(state: &GatewayState, mut response: Response, session_id: Option<&str>, start: Instant) -> Response {
    let headers = response.headers_mut();
    if let Some(id) = session_id {
        if !headers.contains_key(&state.header_name) {
            if let Ok(value) = HeaderValue::from_str(id) {
                headers.insert(state.header_name.clone(), value);
            }
        }
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", start.elapsed().as_secs_f64())) {
        headers.insert(PROCESS_TIME_HEADER, value);
    }
    response
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
