//! Registry statistics and fan-out results

use serde::Serialize;

/// Connection statistics
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_recipients: usize,
}

/// Outcome of fanning one frame out to a set of connections
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DeliveryResult {
    /// Number of connections the frame was queued on
    pub delivered_to: usize,
    /// Number of connections whose write failed (and were unregistered)
    pub failed: usize,
}

impl DeliveryResult {
    pub fn new(delivered_to: usize, failed: usize) -> Self {
        Self { delivered_to, failed }
    }

    pub fn success(&self) -> bool {
        self.delivered_to > 0
    }

    pub fn merge(self, other: DeliveryResult) -> Self {
        Self {
            delivered_to: self.delivered_to + other.delivered_to,
            failed: self.failed + other.failed,
        }
    }
}
