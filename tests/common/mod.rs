//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use session_proxy::config::ProxyConfig;
use session_proxy::http::HttpServer;
use session_proxy::lifecycle::Shutdown;
use session_proxy::session::SessionStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Spawn the mock target server on an ephemeral port.
///
/// Routes:
/// - `/echo`: reflects method, path, query, headers and body as JSON
/// - `/set-cookie`: sets `sid=abc; Path=/`
/// - `/expire-cookie`: expires `sid`
/// - `/login`: sets `auth=1` and redirects to `/echo`
/// - `/loop`: redirects to itself
/// - `/slow`: answers after three seconds
/// - `/file`: CSV attachment named `report.csv`
/// - `/plain`: text body without a disposition
/// - `/stall`: sends one chunk, then stalls for three seconds mid-body
/// - `/foreign-cookie`: sets a cookie for another domain
/// - `/status/{code}`: empty reply with the given status
pub async fn start_target() -> SocketAddr {
    let app = Router::new()
        .route("/echo", any(echo))
        .route("/set-cookie", any(|| async { ([(header::SET_COOKIE, "sid=abc; Path=/")], "cookie set") }))
        .route(
            "/expire-cookie",
            any(|| async { ([(header::SET_COOKIE, "sid=; Max-Age=0; Path=/")], "cookie expired") }),
        )
        .route(
            "/login",
            any(|| async {
                (
                    StatusCode::FOUND,
                    [(header::SET_COOKIE, "auth=1; Path=/"), (header::LOCATION, "/echo")],
                )
            }),
        )
        .route("/loop", any(|| async { (StatusCode::FOUND, [(header::LOCATION, "/loop")]) }))
        .route(
            "/slow",
            any(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "late"
            }),
        )
        .route(
            "/file",
            get(|| async {
                (
                    [
                        (header::CONTENT_TYPE, "text/csv"),
                        (header::CONTENT_DISPOSITION, "attachment; filename=\"report.csv\""),
                    ],
                    "a,b\n1,2\n",
                )
            }),
        )
        .route("/plain", get(|| async { "plain body" }))
        .route(
            "/stall",
            get(|| async {
                let chunks = stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"start")) }).chain(
                    stream::once(async {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        Ok(Bytes::from_static(b"end"))
                    }),
                );
                Body::from_stream(chunks)
            }),
        )
        .route(
            "/foreign-cookie",
            any(|| async { ([(header::SET_COOKIE, "planted=1; Domain=bank.test; Path=/")], "ok") }),
        )
        .route(
            "/status/{code}",
            any(|axum::extract::Path(code): axum::extract::Path<u16>| async move {
                StatusCode::from_u16(code).unwrap_or(StatusCode::OK)
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let mut reflected = Map::new();
    for (name, value) in &headers {
        let value = value.to_str().unwrap_or_default().to_string();
        match reflected.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                reflected.insert(name.as_str().to_string(), Value::String(value));
            }
        }
    }
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": reflected,
        "body": String::from_utf8_lossy(&body),
    }))
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Test configuration: ephemeral port, no environment proxies.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.forward.use_env_proxy = false;
    config
}

/// A running proxy plus a client pointed at it.
pub struct ProxyHarness {
    pub addr: SocketAddr,
    pub store: Arc<SessionStore>,
    pub client: reqwest::Client,
    shutdown: Shutdown,
}

impl ProxyHarness {
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: ProxyConfig) -> Self {
        let server = HttpServer::new(config).unwrap();
        let store = server.store();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = server.run(listener, &server_shutdown, None).await;
        });

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        Self {
            addr,
            store,
            client,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Create a session and return its id.
    pub async fn subscribe(&self) -> String {
        let res = self.client.post(self.url("/subscribe")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        body["session_id"].as_str().unwrap().to_string()
    }

    /// POST `path` with the session header and an optional JSON body.
    pub async fn post(&self, path: &str, session: &str, body: Option<Value>) -> reqwest::Response {
        let mut req = self.client.post(self.url(path)).header("X-Session-Id", session);
        if let Some(body) = body {
            req = req.json(&body);
        }
        req.send().await.unwrap()
    }

    /// POST and decode the JSON reply, returning status and body.
    pub async fn post_json(&self, path: &str, session: &str, body: Option<Value>) -> (u16, Value) {
        let res = self.post(path, session, body).await;
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }

    pub async fn forward(&self, session: &str, payload: Value) -> (u16, Value) {
        self.post_json("/forward", session, Some(payload)).await
    }
}

impl Drop for ProxyHarness {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
