//! Prometheus metrics for the relay.
//!
//! - Connection metrics (active, opened, closed, rejected, lifetime)
//! - Relay metrics (messages received, deliveries, failures, pruning, fan-out size)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, RelayMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of connections currently in the registry
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of registered WebSocket connections"
    ).unwrap();

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections accepted and registered"
    ).unwrap();

    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed after registration"
    ).unwrap();

    /// Connection attempts refused for a missing or wrong token
    pub static ref AUTH_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_auth_failures_total", METRIC_PREFIX),
        "Total connection attempts rejected by the token check"
    ).unwrap();

    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "Lifetime of registered WebSocket connections in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Relay Metrics
    // ============================================================================

    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Total text messages received from clients"
    ).unwrap();

    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total per-connection deliveries that succeeded"
    ).unwrap();

    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total per-connection deliveries that failed"
    ).unwrap();

    pub static ref CONNECTIONS_PRUNED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_pruned_total", METRIC_PREFIX),
        "Total connections removed from the registry after a failed delivery"
    ).unwrap();

    /// Targets per broadcast pass
    pub static ref BROADCAST_FANOUT: Histogram = register_histogram!(
        format!("{}_broadcast_fanout", METRIC_PREFIX),
        "Number of connections targeted by a single broadcast pass",
        vec![1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();
}
