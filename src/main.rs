//! Session-isolating HTTP forward proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request          ┌──────────────────────────────────────────────┐
//!     ────────────────────────┼─▶ session gateway ──▶ handlers               │
//!                             │   (X-Session-Id)       │                     │
//!                             │                        ▼                     │
//!                             │                  session store ◀── sweeper   │
//!                             │                  (per-session client,      │
//!                             │                   headers, cookie jar)       │
//!                             │                        │                     │
//!                             │                        ▼                     │
//!     Client Response         │                   forwarder ─────────────────┼──▶ Target
//!     ◀───────────────────────┼── normalized JSON / byte stream              │    Server
//!                             └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use session_proxy::config::{self, watcher::ConfigWatcher};
use session_proxy::lifecycle::{wait_for_signal, Shutdown};
use session_proxy::observability::{logging, metrics};
use session_proxy::{HttpServer, ProxyConfig};

#[derive(Parser)]
#[command(name = "session-proxy")]
#[command(version, about = "Session-isolating HTTP forward proxy", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "SESSION_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = config::load(cli.config.as_deref())?;
    logging::init(&config.observability.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "session-proxy starting");
    tracing::info!(
        bind_address = %config.bind_address(),
        workers = config.server.workers,
        session_timeout_secs = config.session.timeout_secs,
        reload = config.server.reload,
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()?;

    runtime.block_on(serve(config, cli.config))
}

async fn serve(config: ProxyConfig, config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(config.bind_address()).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // the watcher handle must outlive the server
    let mut _watcher = None;
    let mut updates = None;
    match (&config_path, config.server.reload) {
        (Some(path), true) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => {
                    _watcher = Some(handle);
                    updates = Some(rx);
                }
                Err(e) => tracing::error!(error = %e, "Failed to start config watcher"),
            }
        }
        (None, true) => tracing::warn!("Reload requested but no config file is in use"),
        _ => {}
    }

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        tracing::info!(signal, "Signal received, shutting down");
        trigger.trigger();
    });

    let server = HttpServer::new(config)?;
    server.run(listener, &shutdown, updates).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
