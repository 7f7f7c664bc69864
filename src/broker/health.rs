//! Broker subscription health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

/// Broker subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BrokerHealthStatus {
    /// Subscription connection established
    Healthy = 0,
    /// Not connected yet, or waiting out a backoff after a failure
    Reconnecting = 1,
    /// Subscription loop has exited after shutdown
    Stopped = 2,
}

impl BrokerHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerHealthStatus::Healthy => "healthy",
            BrokerHealthStatus::Reconnecting => "reconnecting",
            BrokerHealthStatus::Stopped => "stopped",
        }
    }
}

impl From<u8> for BrokerHealthStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => BrokerHealthStatus::Healthy,
            2 => BrokerHealthStatus::Stopped,
            _ => BrokerHealthStatus::Reconnecting,
        }
    }
}

/// Health of the broker subscription, shared with the health endpoint
pub struct BrokerHealth {
    status: AtomicU8,
    last_connected_ms: AtomicI64,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    total_reconnections: AtomicU32,
}

impl BrokerHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(BrokerHealthStatus::Reconnecting as u8),
            last_connected_ms: AtomicI64::new(0),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            total_reconnections: AtomicU32::new(0),
        }
    }

    /// Mark the subscription as connected
    pub fn set_connected(&self) {
        let previous = self
            .status
            .swap(BrokerHealthStatus::Healthy as u8, Ordering::AcqRel);
        self.last_connected_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);

        // Only a recovery after a failure counts as a reconnection
        if previous != BrokerHealthStatus::Healthy as u8
            && self.consecutive_failures.swap(0, Ordering::AcqRel) > 0
        {
            self.total_reconnections.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Record a connectivity failure
    pub fn record_failure(&self) {
        self.status
            .store(BrokerHealthStatus::Reconnecting as u8, Ordering::Release);
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
        self.total_failures.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_stopped(&self) {
        self.status
            .store(BrokerHealthStatus::Stopped as u8, Ordering::Release);
    }

    pub fn status(&self) -> BrokerHealthStatus {
        BrokerHealthStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == BrokerHealthStatus::Healthy
    }

    pub fn stats(&self) -> BrokerHealthStats {
        BrokerHealthStats {
            status: self.status(),
            last_connected_ms: self.last_connected_ms.load(Ordering::Acquire),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            total_failures: self.total_failures.load(Ordering::Acquire),
            total_reconnections: self.total_reconnections.load(Ordering::Acquire),
        }
    }
}

impl Default for BrokerHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker health statistics
#[derive(Debug, Clone, Serialize)]
pub struct BrokerHealthStats {
    pub status: BrokerHealthStatus,
    pub last_connected_ms: i64,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_reconnections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_health_status() {
        let health = BrokerHealth::new();
        assert_eq!(health.status(), BrokerHealthStatus::Reconnecting);
        assert!(!health.is_healthy());

        health.set_connected();
        assert!(health.is_healthy());

        health.record_failure();
        assert_eq!(health.status(), BrokerHealthStatus::Reconnecting);

        health.set_stopped();
        assert_eq!(health.status().as_str(), "stopped");
    }

    #[test]
    fn test_broker_health_stats() {
        let health = BrokerHealth::new();
        health.set_connected();
        health.record_failure();
        health.record_failure();
        health.set_connected();

        let stats = health.stats();
        assert_eq!(stats.status, BrokerHealthStatus::Healthy);
        assert_eq!(stats.total_failures, 2);
        assert_eq!(stats.total_reconnections, 1);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.last_connected_ms > 0);
    }

    #[test]
    fn test_first_connect_is_not_a_reconnection() {
        let health = BrokerHealth::new();
        health.set_connected();
        assert_eq!(health.stats().total_reconnections, 0);
    }
}
