//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_sessions_created_total` (counter)
//! - `proxy_sessions_evicted_total` (counter): by reason (expired, swept, deleted)
//! - `proxy_sessions_active` (gauge)
//! - `proxy_forward_requests_total` (counter): by kind (forward, download) and status
//! - `proxy_forward_duration_seconds` (histogram): by kind
//! - `proxy_auth_rejections_total` (counter): by reason (missing, invalid)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_created() {
    counter!("proxy_sessions_created_total").increment(1);
}

pub fn record_session_evicted(reason: &'static str) {
    counter!("proxy_sessions_evicted_total", "reason" => reason).increment(1);
}

pub fn record_sessions_swept(count: usize) {
    if count > 0 {
        counter!("proxy_sessions_evicted_total", "reason" => "swept").increment(count as u64);
    }
}

pub fn record_active_sessions(count: usize) {
    gauge!("proxy_sessions_active").set(count as f64);
}

pub fn record_forward(kind: &'static str, status: &str, elapsed: Duration) {
    counter!("proxy_forward_requests_total", "kind" => kind, "status" => status.to_string()).increment(1);
    histogram!("proxy_forward_duration_seconds", "kind" => kind).record(elapsed.as_secs_f64());
}

pub fn record_auth_rejection(reason: &'static str) {
    counter!("proxy_auth_rejections_total", "reason" => reason).increment(1);
}
