//! Prometheus metrics for the Inkpress server.
//!
//! Cache store counters are emitted by `inkpress-cache` through the same
//! `metrics` facade; this module installs the recorder and adds the HTTP
//! layer counters.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const HTTP_CACHE_RESPONSES_TOTAL: &str = "http_cache_responses_total";
    pub const HTTP_CACHE_STORES_TOTAL: &str = "http_cache_stores_total";
    pub const CACHE_INVALIDATED_KEYS_TOTAL: &str = "cache_invalidated_keys_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics renders from the handle
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status_class" => status_class
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a response served by the cache middleware (`HIT` or `MISS`).
pub fn record_http_cache(status: &'static str, namespace: &str) {
    counter!(
        names::HTTP_CACHE_RESPONSES_TOTAL,
        "cache" => status,
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

/// Record the outcome of a background response store.
pub fn record_http_cache_store(stored: bool) {
    let outcome = if stored { "stored" } else { "failed" };
    counter!(names::HTTP_CACHE_STORES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record keys removed by invalidation.
pub fn record_invalidated_keys(count: usize) {
    counter!(names::CACHE_INVALIDATED_KEYS_TOTAL).increment(count as u64);
}
