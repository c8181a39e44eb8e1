//! Prometheus metrics endpoint
//!
//! Exposes routing, dispatch and health metrics in Prometheus format.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    // Force initialization of the lazy static
    let _ = &*PROMETHEUS_HANDLE;

    register_metrics();
}

/// Describe every metric the service emits
fn register_metrics() {
    metrics::describe_counter!(
        "dispatch_requests_total",
        "Dispatches that reached a terminal response, by status and target"
    );
    metrics::describe_histogram!(
        "dispatch_duration_seconds",
        "End-to-end dispatch duration in seconds"
    );
    metrics::describe_counter!(
        "routing_decisions_total",
        "Routing decisions, by chosen target and special override"
    );
    metrics::describe_counter!(
        "tier_skip_violations_total",
        "Calls refused for skipping a tier"
    );
    metrics::describe_counter!(
        "health_transitions_total",
        "Health state changes, by target and new state"
    );
    metrics::describe_counter!(
        "dispatch_retries_total",
        "Retried downstream calls, by callee tier"
    );
}

/// Prometheus metrics endpoint handler
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}
