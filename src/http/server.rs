//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (session gateway, body limit, request id, tracing)
//! - Own the session store and its background tasks
//! - Bind server to listener and drain on shutdown

use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::forward::Forwarder;
use crate::health::ConnectivityProbe;
use crate::http::handlers;
use crate::http::middleware::{session_gateway, GatewayState};
use crate::lifecycle::Shutdown;
use crate::session::{ClientSettings, SessionStore, SessionSweeper};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub forwarder: Arc<Forwarder>,
    pub probe: Arc<ConnectivityProbe>,
    pub header_name: HeaderName,
    pub default_timeout_secs: u64,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid session header name: {0}")]
    HeaderName(String),
    #[error("failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),
}

/// HTTP server for the session proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    store: Arc<SessionStore>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let header_name = HeaderName::from_bytes(config.session.header_name.as_bytes())
            .map_err(|_| ServerError::HeaderName(config.session.header_name.clone()))?;

        let client_settings = ClientSettings {
            use_env_proxy: config.forward.use_env_proxy,
            ..ClientSettings::default()
        };
        let store = Arc::new(SessionStore::new(config.session.timeout(), client_settings));
        let probe = Arc::new(ConnectivityProbe::new(&config.health, config.forward.use_env_proxy)?);

        let state = AppState {
            store: store.clone(),
            forwarder: Arc::new(Forwarder::new(config.forward.max_redirects)),
            probe,
            header_name: header_name.clone(),
            default_timeout_secs: config.forward.default_timeout_secs,
        };
        let gateway = GatewayState {
            store: store.clone(),
            header_name,
        };

        let router = Self::build_router(&config, state, gateway);
        Ok(Self { router, config, store })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState, gateway: GatewayState) -> Router {
        let router = Router::new()
            .route("/subscribe", post(handlers::subscribe))
            .route("/unsubscribe", post(handlers::unsubscribe).delete(handlers::unsubscribe))
            .route(
                "/unsubscribe/{id}",
                post(handlers::unsubscribe_id).delete(handlers::unsubscribe_id),
            )
            .route("/set-headers", post(handlers::set_headers))
            .route("/get-headers", post(handlers::get_headers))
            .route("/get-cookies", post(handlers::get_cookies))
            .route("/get-session-info", post(handlers::get_session_info))
            .route("/forward", post(handlers::forward))
            .route("/login", post(handlers::login))
            .route("/logout", post(handlers::logout))
            .route("/download", post(handlers::download))
            .route("/dowwnload", post(handlers::download))
            .route("/health", get(handlers::health_check))
            .route("/health-check", get(handlers::health_check))
            .fallback(handlers::not_found)
            .with_state(state)
            .layer(middleware::from_fn_with_state(gateway, session_gateway))
            .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

        if config.server.access_log {
            router.layer(TraceLayer::new_for_http())
        } else {
            router
        }
    }

    /// The router, for driving the server without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server on `listener` until `shutdown` fires.
    ///
    /// `config_updates` carries reloaded configurations from the file watcher.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: &Shutdown,
        config_updates: Option<mpsc::UnboundedReceiver<ProxyConfig>>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            session_timeout_secs = self.config.session.timeout_secs,
            cleanup_interval_secs = self.config.session.cleanup_interval_secs,
            "HTTP server starting"
        );

        let sweeper = SessionSweeper::new(self.store.clone(), self.config.session.cleanup_interval());
        let sweeper_handle = tokio::spawn(sweeper.run(shutdown.subscribe()));

        if let Some(updates) = config_updates {
            tokio::spawn(apply_config_updates(self.store.clone(), updates, shutdown.subscribe()));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let stop = shutdown.triggered();

        // Serve with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop.await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        if let Err(e) = sweeper_handle.await {
            tracing::warn!(error = %e, "Session sweeper task failed");
        }

        let closed = self.store.clear();
        tracing::info!(closed, "HTTP server stopped");
        Ok(())
    }
}

/// Apply reloaded configuration to the live store.
async fn apply_config_updates(
    store: Arc<SessionStore>,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                if config.session.timeout() != store.timeout() {
                    store.set_timeout(config.session.timeout());
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
