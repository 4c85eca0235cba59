//! Metric names and descriptions.
//!
//! Recording goes through the `metrics` facade; installing an exporter is up
//! to the embedding binary. Without one, recording is a no-op.

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused because `max_connection` was reached (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Inbound data frames (counter).
pub const WS_FRAMES_RECEIVED_TOTAL: &str = "ws_frames_received_total";
/// Outbound frames dropped on a full or closed queue (counter).
pub const WS_FRAMES_DROPPED_TOTAL: &str = "ws_frames_dropped_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Stateless requests answered (counter, labels: method, status).
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// Stateless request latency (histogram, labels: method).
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
/// Reactor failures (counter, labels: event).
pub const REACTOR_ERRORS_TOTAL: &str = "reactor_errors_total";

/// Register descriptions with the installed recorder.
pub fn describe() {
    describe_counter!(WS_CONNECTIONS_TOTAL, "WebSocket connections opened");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "WebSocket connections closed");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "Live WebSocket connections");
    describe_counter!(
        WS_CONNECTIONS_REJECTED_TOTAL,
        "Upgrades refused at the connection limit"
    );
    describe_counter!(WS_FRAMES_RECEIVED_TOTAL, "Inbound WebSocket data frames");
    describe_counter!(WS_FRAMES_DROPPED_TOTAL, "Outbound frames dropped");
    describe_histogram!(
        WS_CONNECTION_DURATION_SECONDS,
        Unit::Seconds,
        "WebSocket connection lifetime"
    );
    describe_counter!(HTTP_REQUESTS_TOTAL, "Stateless requests answered");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Stateless request latency"
    );
    describe_counter!(REACTOR_ERRORS_TOTAL, "Reactor failures");
}
