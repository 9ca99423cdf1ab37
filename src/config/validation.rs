//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check that names and URLs are usable at runtime
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.port == 0 {
        errors.push(ValidationError::new("server.port", "must be non-zero"));
    }
    if config.server.workers == 0 {
        errors.push(ValidationError::new("server.workers", "must be at least 1"));
    }
    if config.server.max_body_bytes == 0 {
        errors.push(ValidationError::new("server.max_body_bytes", "must be non-zero"));
    }

    if config.session.timeout_secs == 0 {
        errors.push(ValidationError::new("session.timeout_secs", "must be greater than 0"));
    }
    if config.session.cleanup_interval_secs == 0 {
        errors.push(ValidationError::new(
            "session.cleanup_interval_secs",
            "must be greater than 0",
        ));
    }
    if HeaderName::from_bytes(config.session.header_name.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            "session.header_name",
            format!("'{}' is not a valid header name", config.session.header_name),
        ));
    }

    if !(1..=300).contains(&config.forward.default_timeout_secs) {
        errors.push(ValidationError::new(
            "forward.default_timeout_secs",
            "must be between 1 and 300",
        ));
    }

    let probe = &config.health.probe_url;
    if !(probe.starts_with("http://") || probe.starts_with("https://")) {
        errors.push(ValidationError::new(
            "health.probe_url",
            "must start with http:// or https://",
        ));
    }
    if config.health.timeout_secs == 0 {
        errors.push(ValidationError::new("health.timeout_secs", "must be greater than 0"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("must be one of: {}", LOG_LEVELS.join(", ")),
        ));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address when metrics are enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ProxyConfig::default();
        config.server.port = 0;
        config.session.timeout_secs = 0;
        config.forward.default_timeout_secs = 301;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "server.port",
                "session.timeout_secs",
                "forward.default_timeout_secs",
                "observability.log_level",
            ]
        );
    }

    #[test]
    fn test_rejects_bad_header_name_and_probe() {
        let mut config = ProxyConfig::default();
        config.session.header_name = "X Session".into();
        config.health.probe_url = "ftp://example.com".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "session.header_name");
        assert_eq!(errors[1].field, "health.probe_url");
    }
}
