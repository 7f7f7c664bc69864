//! Factory function for creating broker transports

use std::sync::Arc;

use crate::config::{BrokerBackend, BrokerConfig};

use super::memory_backend::MemoryBroker;
use super::redis_backend::RedisBroker;
use super::transport::{BrokerError, BrokerTransport};

/// Create a broker transport based on configuration
pub fn create_broker(config: &BrokerConfig) -> Result<Arc<dyn BrokerTransport>, BrokerError> {
    match config.backend {
        BrokerBackend::Redis => {
            tracing::info!(url = %config.url, "Creating Redis broker transport");
            Ok(Arc::new(RedisBroker::new(config)?))
        }
        BrokerBackend::Memory => {
            tracing::warn!("Using in-memory broker; notifications will not cross process boundaries");
            Ok(Arc::new(MemoryBroker::new()))
        }
    }
}
