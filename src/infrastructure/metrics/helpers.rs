//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    AUTH_FAILURES_TOTAL, BROADCAST_FANOUT, CONNECTIONS_PRUNED_TOTAL, MESSAGES_DELIVERED_TOTAL,
    MESSAGES_FAILED_TOTAL, MESSAGES_RECEIVED_TOTAL, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED,
    WS_CONNECTION_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(lifetime: Duration) {
        WS_CONNECTIONS_CLOSED.inc();
        WS_CONNECTION_DURATION.observe(lifetime.as_secs_f64());
    }

    pub fn record_auth_failure() {
        AUTH_FAILURES_TOTAL.inc();
    }
}

/// Helper struct for recording relay metrics
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn record_received() {
        MESSAGES_RECEIVED_TOTAL.inc();
    }

    /// Record the outcome of one broadcast pass
    pub fn record_pass(targets: usize, delivered: u64, failed: u64, pruned: u64) {
        BROADCAST_FANOUT.observe(targets as f64);
        MESSAGES_DELIVERED_TOTAL.inc_by(delivered);
        MESSAGES_FAILED_TOTAL.inc_by(failed);
        CONNECTIONS_PRUNED_TOTAL.inc_by(pruned);
    }
}
