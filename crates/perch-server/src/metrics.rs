//! Metric names and the `/metrics` renderer.
//!
//! Recording goes through the `metrics` facade; without an installed recorder
//! every call is a no-op.

use metrics_exporter_prometheus::PrometheusHandle;

/// Requests handed to a worker (counter, labels: command).
pub const REQUESTS_TOTAL: &str = "perch_requests_total";
/// Requests answered with an error (counter, labels: command, kind).
pub const REQUEST_ERRORS_TOTAL: &str = "perch_request_errors_total";
/// Handler wall time (histogram, labels: command).
pub const REQUEST_DURATION_SECONDS: &str = "perch_request_duration_seconds";
/// Live WebSocket connections (gauge).
pub const CONNECTIONS: &str = "perch_connections";
/// Inbound messages dropped without a reply, or refused (counter, labels: reason).
pub const DROPPED_MESSAGES_TOTAL: &str = "perch_dropped_messages_total";

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}
