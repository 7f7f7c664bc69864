use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::broker::MessageHandler;
use crate::connection_manager::{ConnectionRegistry, DeliveryResult};
use crate::metrics::DeliveryMetrics;
use crate::websocket::OutboundMessage;

use super::codec;
use super::{Envelope, RecipientId, StatusMessage};

/// Statistics for the delivery dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Broker payloads handed to the dispatcher
    pub total_received: AtomicU64,
    /// Payloads that failed to decode and were discarded
    pub total_decode_failures: AtomicU64,
    /// Successful connection writes
    pub total_delivered: AtomicU64,
    /// Failed connection writes
    pub total_failed: AtomicU64,
    /// Decoded messages whose recipient had no connection on this process
    pub total_unroutable: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_received: self.total_received.load(Ordering::Relaxed),
            total_decode_failures: self.total_decode_failures.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_unroutable: self.total_unroutable.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_received: u64,
    pub total_decode_failures: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub total_unroutable: u64,
}

/// Routes decoded broker messages to the recipient's local connections
pub struct DeliveryDispatcher {
    registry: Arc<ConnectionRegistry>,
    stats: DispatcherStats,
}

impl DeliveryDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Decode one broker payload and deliver it.
    ///
    /// A payload that fails to decode is logged and dropped.
    pub async fn dispatch_payload(&self, payload: &str) -> DeliveryResult {
        self.stats.total_received.fetch_add(1, Ordering::Relaxed);

        match codec::decode_envelope(payload) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => {
                self.stats.total_decode_failures.fetch_add(1, Ordering::Relaxed);
                DeliveryMetrics::record_decode_failure();
                tracing::warn!(
                    error = %e,
                    payload_len = payload.len(),
                    "Discarding broker payload that failed to decode"
                );
                DeliveryResult::default()
            }
        }
    }

    /// Deliver an already decoded envelope
    pub async fn dispatch(&self, envelope: Envelope) -> DeliveryResult {
        self.send_to_recipient(&envelope.recipient, &envelope.status).await
    }

    /// Push a status message to every live connection of `recipient`
    #[tracing::instrument(
        name = "dispatcher.send_to_recipient",
        skip(self, message),
        fields(recipient = %recipient, status = message.status, severity = %message.severity)
    )]
    pub async fn send_to_recipient(
        &self,
        recipient: &RecipientId,
        message: &StatusMessage,
    ) -> DeliveryResult {
        if !self.registry.contains(recipient) {
            self.stats.total_unroutable.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Recipient has no live connection on this process");
            return DeliveryResult::default();
        }

        // Encode once; every connection shares the same frame
        let frame = match codec::encode_push(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode push frame");
                return DeliveryResult::default();
            }
        };

        let result = self
            .registry
            .send_to(recipient, OutboundMessage::text(frame))
            .await;
        self.record(&result);

        tracing::debug!(
            delivered = result.delivered_to,
            failed = result.failed,
            "Notification fanned out"
        );
        result
    }

    /// Push a status message to every live connection on this process
    #[tracing::instrument(name = "dispatcher.broadcast", skip_all)]
    pub async fn broadcast(&self, message: &StatusMessage) -> DeliveryResult {
        let frame = match codec::encode_push(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode push frame");
                return DeliveryResult::default();
            }
        };

        let result = self.registry.broadcast(OutboundMessage::text(frame)).await;
        self.record(&result);
        result
    }

    fn record(&self, result: &DeliveryResult) {
        self.stats
            .total_delivered
            .fetch_add(result.delivered_to as u64, Ordering::Relaxed);
        self.stats
            .total_failed
            .fetch_add(result.failed as u64, Ordering::Relaxed);
        DeliveryMetrics::record(result.delivered_to, result.failed);
    }
}

#[async_trait]
impl MessageHandler for DeliveryDispatcher {
    async fn handle(&self, payload: String) {
        self.dispatch_payload(&payload).await;
    }
}
