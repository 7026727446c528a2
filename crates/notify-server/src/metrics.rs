//! Metrics collection and export for Notify.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "notify_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "notify_connections_active";
    pub const FRAMES_TOTAL: &str = "notify_frames_total";
    pub const FRAMES_BYTES: &str = "notify_frames_bytes";
    pub const DELIVERIES_TOTAL: &str = "notify_deliveries_total";
    pub const PUBLISHED_TOTAL: &str = "notify_published_total";
    pub const INTENTS_TOTAL: &str = "notify_backend_intents_total";
    pub const LATENCY_SECONDS: &str = "notify_frame_latency_seconds";
    pub const ERRORS_TOTAL: &str = "notify_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of client frames");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of client frames");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Notifications queued for a client"
    );
    metrics::describe_counter!(
        names::PUBLISHED_TOTAL,
        "Messages accepted by the publish endpoint"
    );
    metrics::describe_counter!(
        names::INTENTS_TOTAL,
        "Subscribe and unsubscribe intents issued to the backend"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Client frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a client frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a notification queued for a client.
pub fn record_delivery() {
    counter!(names::DELIVERIES_TOTAL).increment(1);
}

/// Record a message accepted for publishing.
pub fn record_published() {
    counter!(names::PUBLISHED_TOTAL).increment(1);
}

/// Record a backend intent.
pub fn record_intent(kind: &'static str) {
    counter!(names::INTENTS_TOTAL, "kind" => kind).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed, every call is a no-op
        let guard = ConnectionMetricsGuard::new();
        record_frame(12, "inbound");
        record_intent("subscribe");
        record_error("validation");
        drop(guard);
    }
}
