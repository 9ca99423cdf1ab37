//! Outbound connectivity probe.
//!
//! # Responsibilities
//! - Request the probe URL with a bounded timeout
//! - Classify the result for the health endpoint

use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tokio::time;

use crate::config::HealthConfig;

const PROBE_USER_AGENT: &str = concat!("session-proxy-health-check/", env!("CARGO_PKG_VERSION"));

/// Result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Reachable {
        response_time_ms: f64,
    },
    Unreachable {
        error_type: &'static str,
        detail: String,
    },
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable { .. })
    }
}

pub struct ConnectivityProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl ConnectivityProbe {
    pub fn new(config: &HealthConfig, use_env_proxy: bool) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder().user_agent(PROBE_USER_AGENT);
        if !use_env_proxy {
            builder = builder.no_proxy();
        }
        Ok(Self {
            client: builder.build()?,
            url: config.probe_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn check(&self) -> ProbeOutcome {
        let start = Instant::now();
        let outcome = match time::timeout(self.timeout, self.client.get(&self.url).send()).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => ProbeOutcome::Reachable {
                response_time_ms: (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0,
            },
            Ok(Ok(response)) => ProbeOutcome::Unreachable {
                error_type: "UnexpectedStatus",
                detail: format!("Unexpected response from {}: HTTP {}", self.url, response.status().as_u16()),
            },
            Ok(Err(e)) if e.is_timeout() => self.timed_out(),
            Ok(Err(e)) if e.is_connect() => ProbeOutcome::Unreachable {
                error_type: "ConnectionError",
                detail: format!("No internet connection: {e}"),
            },
            Ok(Err(e)) => ProbeOutcome::Unreachable {
                error_type: "Internal",
                detail: format!("Error checking connectivity: {e}"),
            },
            Err(_) => self.timed_out(),
        };

        match &outcome {
            ProbeOutcome::Reachable { response_time_ms } => {
                tracing::debug!(url = %self.url, response_time_ms, "Connectivity probe succeeded")
            }
            ProbeOutcome::Unreachable { error_type, detail } => {
                tracing::warn!(url = %self.url, error_type, detail = %detail, "Connectivity probe failed")
            }
        }
        outcome
    }

    fn timed_out(&self) -> ProbeOutcome {
        ProbeOutcome::Unreachable {
            error_type: "Timeout",
            detail: format!("Timeout connecting to {}", self.url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> HealthConfig {
        HealthConfig {
            probe_url: url.to_string(),
            timeout_secs: 2,
        }
    }

    #[tokio::test]
    async fn test_unreachable_probe_is_connection_error() {
        // bind then drop to get a port with no listener
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let probe = ConnectivityProbe::new(&config(&format!("http://127.0.0.1:{port}/")), false).unwrap();

        match probe.check().await {
            ProbeOutcome::Unreachable { error_type, .. } => assert_eq!(error_type, "ConnectionError"),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
