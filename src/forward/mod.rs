//! Outbound forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! ForwardPayload (payload.rs)
//!     → validate → OutboundRequest
//!     → Forwarder::forward / download (this file)
//!         → per-hop request on the session's client
//!         → Set-Cookie captured into a working jar
//!     → NormalizedResponse (response.rs) or a byte stream
//! ```
//!
//! # Design Decisions
//! - Redirects are followed here, not by the client, so cookies set on
//!   intermediate hops land in the session
//! - Captured cookies are committed to the session only when the call succeeds
//! - The timeout covers the whole exchange for `forward`; for `download` it
//!   covers the header phase and then each gap between body chunks

pub mod error;
pub mod payload;
pub mod response;

use axum::body::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION,
};
use reqwest::{Client, Method, StatusCode};
use std::io;
use std::time::{Duration, Instant};
use url::Url;

use crate::observability::metrics;
use crate::session::{short_id, CookieJar, SessionRecord, SetCookie, StoredCookie};

pub use error::ForwardError;
pub use payload::{ForwardPayload, OutboundBody, OutboundRequest};
pub use response::{filename_from_disposition, NormalizedResponse, RequestInfo};

/// Default hop limit when following redirects.
pub const DEFAULT_MAX_REDIRECTS: usize = 30;

/// Streaming download handed back to the HTTP layer.
pub struct Download {
    pub status: StatusCode,
    pub content_type: String,
    pub filename: String,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Result of following a request to its final hop.
struct Exchange {
    response: reqwest::Response,
    final_url: Url,
    history: Vec<String>,
    captured: Vec<(SetCookie, Url)>,
}

#[derive(Debug, Clone)]
pub struct Forwarder {
    max_redirects: usize,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REDIRECTS)
    }
}

impl Forwarder {
    pub fn new(max_redirects: usize) -> Self {
        Self { max_redirects }
    }

    /// Perform `req` with the session's client and state, buffering the
    /// target's body as text.
    pub async fn forward(
        &self,
        record: &SessionRecord,
        req: OutboundRequest,
    ) -> Result<NormalizedResponse, ForwardError> {
        let start = Instant::now();
        let result = tokio::time::timeout(req.timeout(), async {
            let exchange = self.execute(record, &req).await?;
            let status = exchange.response.status();
            let headers = exchange.response.headers().clone();
            let body = exchange
                .response
                .text()
                .await
                .map_err(|e| self.client_error(e, &req))?;
            Ok::<_, ForwardError>((exchange.final_url, exchange.history, exchange.captured, status, headers, body))
        })
        .await
        .unwrap_or_else(|_| Err(self.timeout_error(&req)));

        let (final_url, history, captured, status, headers, body) = match result {
            Ok(parts) => parts,
            Err(e) => {
                self.log_failure("forward", record, &req, &e, start);
                return Err(e);
            }
        };

        record.apply_set_cookies(&captured);
        let cookies: Vec<StoredCookie> = captured
            .iter()
            .filter(|(set_cookie, _)| !set_cookie.expired)
            .filter_map(|(set_cookie, url)| set_cookie.resolve(url))
            .collect();

        let elapsed = start.elapsed();
        metrics::record_forward("forward", status.as_str(), elapsed);
        tracing::info!(
            session = %short_id(record.id()),
            method = %req.method,
            url = %req.original_url,
            status = status.as_u16(),
            redirects = history.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Forwarded request"
        );

        let content_type = response::content_type(&headers).map(str::to_string);
        Ok(NormalizedResponse {
            status: status.canonical_reason().unwrap_or_default().to_string(),
            status_code: status.as_u16(),
            headers: response::flatten_headers(&headers),
            cookies,
            session_cookies: record.cookies(),
            url: final_url.to_string(),
            elapsed: response::round_secs(elapsed),
            encoding: content_type.as_deref().and_then(response::charset),
            ok: status.as_u16() < 400,
            content_type: content_type.unwrap_or_else(|| "unknown".to_string()),
            request_info: RequestInfo {
                method: req.method.to_string(),
                original_url: req.original_url.clone(),
                final_url: final_url.to_string(),
                redirects_count: history.len(),
                request_size_bytes: req.body.size_hint(),
                response_size_bytes: body.len(),
            },
            history,
            body,
        })
    }

    /// Perform `req` and hand back the body as a stream.
    ///
    /// Cookies are committed before the first byte is streamed.
    pub async fn download(
        &self,
        record: &SessionRecord,
        req: OutboundRequest,
    ) -> Result<Download, ForwardError> {
        let start = Instant::now();
        let exchange = match tokio::time::timeout(req.timeout(), self.execute(record, &req)).await {
            Ok(Ok(exchange)) => exchange,
            Ok(Err(e)) => {
                self.log_failure("download", record, &req, &e, start);
                return Err(e);
            }
            Err(_) => {
                let e = self.timeout_error(&req);
                self.log_failure("download", record, &req, &e, start);
                return Err(e);
            }
        };

        record.apply_set_cookies(&exchange.captured);

        let response = exchange.response;
        let status = response.status();
        let headers = response.headers();
        let content_type = response::content_type(headers)
            .unwrap_or(response::DEFAULT_DOWNLOAD_TYPE)
            .to_string();
        let filename = filename_from_disposition(headers.get(CONTENT_DISPOSITION).and_then(|v| v.to_str().ok()));

        metrics::record_forward("download", status.as_str(), start.elapsed());
        tracing::info!(
            session = %short_id(record.id()),
            url = %req.original_url,
            status = status.as_u16(),
            filename = %filename,
            "Streaming download"
        );

        let stream = idle_limited(response.bytes_stream().boxed(), req.timeout());

        Ok(Download {
            status,
            content_type,
            filename,
            stream,
        })
    }

    /// Send `req`, following redirects when allowed.
    async fn execute(&self, record: &SessionRecord, req: &OutboundRequest) -> Result<Exchange, ForwardError> {
        let client = self.client(record, req)?;

        let mut headers: HeaderMap = record.headers().overlay(&req.headers).to_header_map();
        let mut jar: CookieJar = record.cookie_jar();
        let mut method = req.method.clone();
        let mut body = req.body.clone();
        let mut url = req.url.clone();
        let mut history = Vec::new();
        let mut captured = Vec::new();

        loop {
            let response = self
                .send(&client, &method, &url, &headers, &jar, &body)
                .await
                .map_err(|e| self.client_error(e, req))?;

            for cookie in response.cookies() {
                let set_cookie = SetCookie::from_response_cookie(&cookie);
                jar.apply(&set_cookie, &url);
                captured.push((set_cookie, url.clone()));
            }

            let status = response.status();
            let next = if req.allow_redirects && is_followed_redirect(status) {
                response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|location| url.join(location).ok())
            } else {
                None
            };

            let Some(next) = next else {
                return Ok(Exchange {
                    response,
                    final_url: url,
                    history,
                    captured,
                });
            };

            if history.len() >= self.max_redirects {
                return Err(ForwardError::TooManyRedirects {
                    url: req.original_url.clone(),
                    method: req.method.to_string(),
                    limit: self.max_redirects,
                });
            }

            tracing::debug!(from = %url, to = %next, status = status.as_u16(), "Following redirect");

            if matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER)
                && method != Method::HEAD
            {
                method = Method::GET;
                body = OutboundBody::Empty;
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }
            if next.host_str() != url.host_str() {
                headers.remove(AUTHORIZATION);
            }

            history.push(url.to_string());
            url = next;
        }
    }

    async fn send(
        &self,
        client: &Client,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        jar: &CookieJar,
        body: &OutboundBody,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut headers = headers.clone();
        if let Some(from_jar) = jar.header_value(url) {
            let value = match headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
                Some(explicit) => format!("{explicit}; {from_jar}"),
                None => from_jar,
            };
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(COOKIE, value);
            }
        }

        let builder = client.request(method.clone(), url.clone()).headers(headers);
        let builder = match body {
            OutboundBody::Empty => builder,
            OutboundBody::Form(pairs) => builder.form(pairs),
            OutboundBody::Raw(raw) => builder.body(raw.clone()),
            OutboundBody::Json(json) => builder.json(json),
        };
        builder.send().await
    }

    fn client(&self, record: &SessionRecord, req: &OutboundRequest) -> Result<Client, ForwardError> {
        record.client().ok_or_else(|| ForwardError::Unexpected {
            url: req.original_url.clone(),
            method: req.method.to_string(),
            kind: "SessionClosed",
            message: "session was closed while the request was in flight".to_string(),
        })
    }

    fn client_error(&self, err: reqwest::Error, req: &OutboundRequest) -> ForwardError {
        ForwardError::from_reqwest(err, &req.original_url, req.method.as_str(), req.timeout_secs)
    }

    fn timeout_error(&self, req: &OutboundRequest) -> ForwardError {
        ForwardError::Timeout {
            url: req.original_url.clone(),
            method: req.method.to_string(),
            timeout: req.timeout_secs,
        }
    }

    fn log_failure(
        &self,
        kind: &'static str,
        record: &SessionRecord,
        req: &OutboundRequest,
        err: &ForwardError,
        start: Instant,
    ) {
        let elapsed: Duration = start.elapsed();
        metrics::record_forward(kind, err.kind(), elapsed);
        tracing::warn!(
            session = %short_id(record.id()),
            method = %req.method,
            url = %req.original_url,
            error_type = err.kind(),
            error = %err,
            elapsed_ms = elapsed.as_millis() as u64,
            "Forward failed"
        );
    }
}

/// End the stream with a `TimedOut` error when no chunk arrives within `idle`.
fn idle_limited(
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    idle: Duration,
) -> BoxStream<'static, io::Result<Bytes>> {
    futures_util::stream::unfold(Some(body), move |body| async move {
        let Some(mut body) = body else {
            return None;
        };
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(e))) => Some((Err(io::Error::other(e)), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data from target for {}s", idle.as_secs()),
                )),
                None,
            )),
        }
    })
    .boxed()
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let body = futures_util::stream::once(async { Ok::<_, reqwest::Error>(Bytes::from_static(b"start")) })
            .chain(futures_util::stream::pending())
            .boxed();
        let mut stream = idle_limited(body, Duration::from_millis(50));

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"start"));
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_followed_redirects() {
        assert!(is_followed_redirect(StatusCode::FOUND));
        assert!(is_followed_redirect(StatusCode::PERMANENT_REDIRECT));
        assert!(!is_followed_redirect(StatusCode::NOT_MODIFIED));
        assert!(!is_followed_redirect(StatusCode::OK));
    }
}
