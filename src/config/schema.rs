//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the session proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener and worker settings.
    pub server: ServerConfig,

    /// Session registry settings.
    pub session: SessionConfig,

    /// Outbound forwarding settings.
    pub forward: ForwardConfig,

    /// Connectivity probe settings.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Address the listener binds to, as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// TCP port to bind.
    pub port: u16,

    /// Tokio worker threads handling requests.
    pub workers: usize,

    /// Watch the config file and apply changes at runtime.
    pub reload: bool,

    /// Emit a span per inbound request.
    pub access_log: bool,

    /// Maximum inbound request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5003,
            workers: 1,
            reload: false,
            access_log: false,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Session registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is evicted, in seconds.
    pub timeout_secs: u64,

    /// Interval between sweeps of expired sessions, in seconds.
    pub cleanup_interval_secs: u64,

    /// Request header carrying the session id.
    pub header_name: String,
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            cleanup_interval_secs: 300,
            header_name: "X-Session-Id".to_string(),
        }
    }
}

/// Outbound forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ForwardConfig {
    /// Timeout applied when a forward payload does not carry one.
    pub default_timeout_secs: u64,

    /// Maximum redirect hops followed per call.
    pub max_redirects: usize,

    /// Honor `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` for outbound calls.
    pub use_env_proxy: bool,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            max_redirects: 30,
            use_env_proxy: true,
        }
    }
}

/// Outbound connectivity probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// URL probed by the health check endpoint.
    pub probe_url: String,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://www.google.com".to_string(),
            timeout_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
