//! Prometheus metrics for the relay.
//!
//! - Connection metrics (active connections, connected recipients, lifetimes)
//! - Broker metrics (published, received, discarded, reconnects)
//! - Delivery metrics (writes delivered/failed, decode failures, pruned entries)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "status_relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of registered WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of registered WebSocket connections"
    ).unwrap();

    /// Number of recipients with at least one connection
    pub static ref RECIPIENTS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_recipients_connected", METRIC_PREFIX),
        "Number of recipients with at least one live connection"
    ).unwrap();

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    pub static ref WS_CONNECTIONS_REJECTED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_rejected_total", METRIC_PREFIX),
        "Total WebSocket handshakes rejected by the identity provider"
    ).unwrap();

    /// WebSocket connection lifetime
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Broker Metrics
    // ============================================================================

    pub static ref BROKER_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broker_published_total", METRIC_PREFIX),
        "Total messages pushed onto the broker"
    ).unwrap();

    /// Publishes dropped after a transport or encoding failure
    pub static ref BROKER_PUBLISH_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broker_publish_dropped_total", METRIC_PREFIX),
        "Total messages dropped because publishing failed"
    ).unwrap();

    pub static ref BROKER_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broker_received_total", METRIC_PREFIX),
        "Total messages popped from the broker"
    ).unwrap();

    pub static ref BROKER_DISCARDED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broker_discarded_total", METRIC_PREFIX),
        "Total popped messages discarded because their channel did not match"
    ).unwrap();

    pub static ref BROKER_RECONNECT_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broker_reconnect_attempts_total", METRIC_PREFIX),
        "Total broker connectivity failures followed by a backoff"
    ).unwrap();

    /// Broker subscription status (1 = connected, 0 = disconnected)
    pub static ref BROKER_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_broker_connection_status", METRIC_PREFIX),
        "Broker subscription status (1=connected, 0=disconnected)"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Connection writes by outcome
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Connection writes by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref DECODE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_decode_failures_total", METRIC_PREFIX),
        "Total broker payloads that failed to decode"
    ).unwrap();

    pub static ref REGISTRY_PRUNED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_registry_pruned_total", METRIC_PREFIX),
        "Total registry entries removed without a live connection"
    ).unwrap();
}

/// Encode all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper for keeping the registry gauges in step with registry mutations
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_registered(new_recipient: bool) {
        CONNECTIONS_ACTIVE.inc();
        if new_recipient {
            RECIPIENTS_CONNECTED.inc();
        }
    }

    pub fn record_unregistered(recipient_gone: bool) {
        CONNECTIONS_ACTIVE.dec();
        if recipient_gone {
            RECIPIENTS_CONNECTED.dec();
        }
    }

    pub fn record_pruned(connections: usize, recipients: usize) {
        CONNECTIONS_ACTIVE.sub(connections as i64);
        RECIPIENTS_CONNECTED.sub(recipients as i64);
        REGISTRY_PRUNED_TOTAL.inc_by(connections as u64);
    }
}

/// Helper for recording broker metrics
pub struct BrokerMetrics;

impl BrokerMetrics {
    pub fn record_published() {
        BROKER_PUBLISHED_TOTAL.inc();
    }

    pub fn record_publish_dropped() {
        BROKER_PUBLISH_DROPPED_TOTAL.inc();
    }

    pub fn record_received() {
        BROKER_RECEIVED_TOTAL.inc();
    }

    pub fn record_discarded() {
        BROKER_DISCARDED_TOTAL.inc();
    }

    pub fn record_reconnect_attempt() {
        BROKER_RECONNECT_ATTEMPTS_TOTAL.inc();
        BROKER_CONNECTION_STATUS.set(0);
    }

    pub fn record_connected() {
        BROKER_CONNECTION_STATUS.set(1);
    }
}

/// Helper for recording delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record(delivered: usize, failed: usize) {
        if delivered > 0 {
            DELIVERIES_TOTAL
                .with_label_values(&["delivered"])
                .inc_by(delivered as u64);
        }
        if failed > 0 {
            DELIVERIES_TOTAL
                .with_label_values(&["failed"])
                .inc_by(failed as u64);
        }
    }

    pub fn record_decode_failure() {
        DECODE_FAILURES_TOTAL.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_metrics() {
        BrokerMetrics::record_published();
        DeliveryMetrics::record(2, 1);

        let output = encode_metrics().unwrap();
        assert!(output.contains("status_relay_broker_published_total"));
        assert!(output.contains("status_relay_deliveries_total"));
    }
}
