//! Process-wide cancellation and graceful shutdown.
//!
//! [`ShutdownSignal`] is the single cancellation signal checked by the broker
//! subscription loop, the registry sweeper and every connection task.
//! [`GracefulShutdown`] fires it and waits for connections to drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::connection_manager::ConnectionRegistry;

/// Cloneable one-shot cancellation signal
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal; idempotent
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired (immediately if it already has)
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for connection tasks to unregister (default: 10 seconds)
    pub drain_timeout: Duration,
    /// Poll interval while draining
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Result of a graceful shutdown
#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    pub connections_at_start: usize,
    pub connections_remaining: usize,
    pub duration: Duration,
}

/// Handles graceful shutdown of the relay
pub struct GracefulShutdown {
    registry: Arc<ConnectionRegistry>,
    signal: ShutdownSignal,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(registry: Arc<ConnectionRegistry>, signal: ShutdownSignal) -> Self {
        Self::with_config(registry, signal, ShutdownConfig::default())
    }

    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        signal: ShutdownSignal,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            signal,
            config,
        }
    }

    /// Fire the shutdown signal and wait for connections to unregister
    #[tracing::instrument(name = "graceful_shutdown", skip(self))]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let connections_at_start = self.registry.stats().total_connections;

        tracing::info!(
            reason = %reason,
            connections = connections_at_start,
            "Signaling background tasks and connections to stop"
        );
        self.signal.trigger();

        let deadline = start + self.config.drain_timeout;
        let mut remaining = connections_at_start;
        while remaining > 0 && Instant::now() < deadline {
            tokio::time::sleep(self.config.poll_interval).await;
            remaining = self.registry.stats().total_connections;
        }

        if remaining > 0 {
            let pruned = self.registry.prune_closed();
            tracing::warn!(
                remaining = remaining,
                pruned = pruned,
                "Drain timeout elapsed with connections still registered"
            );
            remaining = self.registry.stats().total_connections;
        }

        let result = ShutdownResult {
            connections_at_start,
            connections_remaining: remaining,
            duration: start.elapsed(),
        };

        tracing::info!(
            connections_at_start = result.connections_at_start,
            connections_remaining = result.connections_remaining,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }
}
