//! Broker bridge: publish/subscribe over a shared queue-based transport.
//!
//! Replicas only talk to each other through the broker. Publishing is
//! best-effort; the subscription loop reconnects forever with backoff until
//! the shutdown signal fires.

mod backoff;
mod client;
mod factory;
mod health;
mod memory_backend;
mod redis_backend;
mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use client::{BrokerClient, MessageHandler, DEFAULT_POP_TIMEOUT};
pub use factory::create_broker;
pub use health::{BrokerHealth, BrokerHealthStats, BrokerHealthStatus};
pub use memory_backend::MemoryBroker;
pub use redis_backend::RedisBroker;
pub use transport::{BrokerError, BrokerSubscription, BrokerTransport, PoppedMessage};
