//! Structured logging.
//!
//! # Responsibilities
//! - Install the global tracing subscriber
//! - Resolve the log filter from `RUST_LOG`, falling back to configuration

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a configured level.
pub fn default_filter(level: &str) -> String {
    format!("session_proxy={level},tower_http={level}")
}

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
///
/// Returns false if a subscriber was already installed.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
