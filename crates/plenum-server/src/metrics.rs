//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "plenum_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "plenum_connections_active";
    pub const MESSAGES_TOTAL: &str = "plenum_messages_total";
    pub const MESSAGES_BYTES: &str = "plenum_messages_bytes";
    pub const EVENTS_INGESTED_TOTAL: &str = "plenum_events_ingested_total";
    pub const BROADCASTS_TOTAL: &str = "plenum_broadcasts_total";
    pub const EVICTIONS_TOTAL: &str = "plenum_evictions_total";
    pub const ERRORS_TOTAL: &str = "plenum_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of subscriber connections since start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active subscriber connections"
    );
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Total number of WebSocket messages processed"
    );
    metrics::describe_counter!(
        names::MESSAGES_BYTES,
        "Total bytes of WebSocket messages processed"
    );
    metrics::describe_counter!(
        names::EVENTS_INGESTED_TOTAL,
        "Total number of device events ingested"
    );
    metrics::describe_counter!(
        names::BROADCASTS_TOTAL,
        "Total number of fan-out broadcasts"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Total number of connections evicted by the liveness probe"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

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

/// Record a WebSocket message.
pub fn record_message(bytes: usize, direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Record an ingested device event.
pub fn record_event(kind: &'static str) {
    counter!(names::EVENTS_INGESTED_TOTAL, "kind" => kind).increment(1);
}

/// Record a fan-out broadcast.
pub fn record_broadcast(scope: &'static str) {
    counter!(names::BROADCASTS_TOTAL, "scope" => scope).increment(1);
}

/// Record liveness-probe evictions.
pub fn record_evictions(count: usize) {
    counter!(names::EVICTIONS_TOTAL).increment(count as u64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
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
