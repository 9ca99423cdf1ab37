//! Endpoint handlers.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::forward::payload::string_headers;
use crate::forward::response::DEFAULT_DOWNLOAD_TYPE;
use crate::forward::ForwardPayload;
use crate::health::ProbeOutcome;
use crate::http::extract::{ClientIp, UserAgent, ValidJson};
use crate::http::middleware::SessionContext;
use crate::http::server::AppState;
use crate::session::short_id;

pub async fn subscribe(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
) -> Result<Response, ApiError> {
    let session_id = state.store.create(&client_ip, &user_agent)?;
    let mut response = Json(json!({ "status": "OK", "session_id": session_id })).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(state.header_name.clone(), value);
    }
    Ok(response)
}

pub async fn unsubscribe(State(state): State<AppState>, Extension(ctx): Extension<SessionContext>) -> Json<Value> {
    end_session(&state, &ctx)
}

pub async fn unsubscribe_id(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if id != ctx.id {
        tracing::warn!(
            session = %short_id(&ctx.id),
            target = %short_id(&id),
            "Refused to unsubscribe a foreign session"
        );
        return Err(ApiError::Forbidden(
            "You can only unsubscribe your own session".to_string(),
        ));
    }
    Ok(end_session(&state, &ctx))
}

fn end_session(state: &AppState, ctx: &SessionContext) -> Json<Value> {
    state.store.delete(&ctx.id);
    Json(json!({
        "status": "OK",
        "detail": format!("Session {} unsubscribed", ctx.id),
    }))
}

pub async fn set_headers(
    Extension(ctx): Extension<SessionContext>,
    ValidJson(payload): ValidJson<Value>,
) -> Result<Json<Value>, ApiError> {
    let Value::Object(map) = payload else {
        return Err(ApiError::Validation(
            "Headers must be a dictionary of string key-value pairs".to_string(),
        ));
    };
    let headers = string_headers(&map)?;
    ctx.record.set_headers(headers.clone());
    tracing::info!(session = %short_id(&ctx.id), count = headers.len(), "Session headers replaced");

    Ok(Json(json!({
        "status": "OK",
        "detail": "Custom headers set successfully",
        "headers": headers,
    })))
}

pub async fn get_headers(Extension(ctx): Extension<SessionContext>) -> Json<Value> {
    Json(json!({ "status": "OK", "headers": ctx.record.headers() }))
}

pub async fn get_cookies(Extension(ctx): Extension<SessionContext>) -> Json<Value> {
    Json(json!({ "status": "OK", "cookies": ctx.record.cookies() }))
}

pub async fn get_session_info(Extension(ctx): Extension<SessionContext>) -> Json<Value> {
    Json(json!({ "status": "OK", "session_info": ctx.record.info() }))
}

pub async fn forward(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    ValidJson(payload): ValidJson<ForwardPayload>,
) -> Result<Response, ApiError> {
    forward_mirrored(&state, &ctx, payload).await
}

/// A forward that defaults to POST, for authenticating against a target.
pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    ValidJson(payload): ValidJson<ForwardPayload>,
) -> Result<Response, ApiError> {
    tracing::info!(session = %short_id(&ctx.id), url = %payload.url, "Login requested");
    forward_mirrored(&state, &ctx, payload.with_default_method("POST")).await
}

async fn forward_mirrored(
    state: &AppState,
    ctx: &SessionContext,
    payload: ForwardPayload,
) -> Result<Response, ApiError> {
    let req = payload.validate(state.default_timeout_secs)?;
    if !req.cookies.is_empty() {
        ctx.record.merge_cookies(req.cookies.iter().cloned());
    }

    let normalized = state.forwarder.forward(&ctx.record, req).await?;
    let status = StatusCode::from_u16(normalized.status_code).unwrap_or(StatusCode::OK);
    Ok((status, Json(normalized)).into_response())
}

/// Drop the session's cookies, headers and client; the id stays usable.
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<Json<Value>, ApiError> {
    state.store.reset(&ctx.id)?;
    Ok(Json(json!({
        "status": "OK",
        "detail": "Session cookies and headers cleared",
    })))
}

pub async fn download(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    ValidJson(payload): ValidJson<ForwardPayload>,
) -> Result<Response, ApiError> {
    let req = payload.validate(state.default_timeout_secs)?;
    if !req.cookies.is_empty() {
        ctx.record.merge_cookies(req.cookies.iter().cloned());
    }

    let download = state.forwarder.download(&ctx.record, req).await?;
    let content_type = HeaderValue::from_str(&download.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_DOWNLOAD_TYPE));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", download.filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"downloaded_file\""));

    Ok((
        download.status,
        [(CONTENT_TYPE, content_type), (CONTENT_DISPOSITION, disposition)],
        Body::from_stream(download.stream),
    )
        .into_response())
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    let stats = state.store.stats();
    let server_info = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": stats.active_sessions,
        "session_timeout_secs": stats.session_timeout_secs,
        "oldest_idle_secs": stats.oldest_idle_secs,
        "probe_url": state.probe.url(),
    });

    match state.probe.check().await {
        ProbeOutcome::Reachable { response_time_ms } => (
            StatusCode::OK,
            Json(json!({
                "status": "OK",
                "internet": true,
                "detail": "Internet connection available",
                "response_time_ms": response_time_ms,
                "server_info": server_info,
            })),
        )
            .into_response(),
        ProbeOutcome::Unreachable { error_type, detail } => {
            let mut server_info = server_info;
            server_info["error_type"] = json!(error_type);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "Service Unavailable",
                    "internet": false,
                    "detail": detail,
                    "server_info": server_info,
                })),
            )
                .into_response()
        }
    }
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
