use std::sync::Arc;
use std::time::Duration;

use crate::connection_manager::ConnectionRegistry;
use crate::shutdown::ShutdownSignal;

/// Periodically removes registry entries whose connection is gone
pub struct RegistrySweeper {
    interval: Duration,
    registry: Arc<ConnectionRegistry>,
    shutdown: ShutdownSignal,
}

impl RegistrySweeper {
    pub fn new(interval: Duration, registry: Arc<ConnectionRegistry>, shutdown: ShutdownSignal) -> Self {
        Self {
            interval,
            registry,
            shutdown,
        }
    }

    pub async fn run(self) {
        let mut timer = tokio::time::interval(self.interval);
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "Registry sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.triggered() => {
                    tracing::info!("Registry sweeper received shutdown signal");
                    break;
                }
                _ = timer.tick() => self.sweep(),
            }
        }

        tracing::info!("Registry sweeper stopped");
    }

    fn sweep(&self) {
        let pruned = self.registry.prune_closed();
        if pruned > 0 {
            tracing::info!(pruned, "Swept stale registry entries");
        } else {
            tracing::debug!("Registry sweep found nothing to remove");
        }
    }
}
