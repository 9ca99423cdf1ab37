//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable naming the optional TOML config file.
pub const CONFIG_PATH_ENV: &str = "SESSION_PROXY_CONFIG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the startup configuration: defaults, then the optional file, then
/// environment overrides. Validated once at the end.
pub fn load(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ProxyConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment variables onto `config`.
///
/// `lookup` abstracts the environment so tests can supply their own values.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("SERVER_HOST") {
        config.server.host = host;
    }
    parse_into(&lookup, "SERVER_PORT", &mut config.server.port);
    parse_into(&lookup, "WORKERS", &mut config.server.workers);
    bool_into(&lookup, "RELOAD", &mut config.server.reload);
    bool_into(&lookup, "ACCESS_LOG", &mut config.server.access_log);
    if let Some(level) = lookup("LOG_LEVEL") {
        config.observability.log_level = level.to_ascii_lowercase();
    }
    parse_into(&lookup, "SESSION_TIMEOUT", &mut config.session.timeout_secs);
    parse_into(&lookup, "CLEANUP_INTERVAL", &mut config.session.cleanup_interval_secs);
    if let Some(url) = lookup("HEALTH_PROBE_URL") {
        config.health.probe_url = url;
    }
    bool_into(&lookup, "METRICS_ENABLED", &mut config.observability.metrics_enabled);
    if let Some(addr) = lookup("METRICS_ADDRESS") {
        config.observability.metrics_address = addr;
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparsable environment value"),
    }
}

fn bool_into<F>(lookup: &F, key: &str, target: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        );
    }
}
