//! Transport abstraction for the shared queue/channel broker.
//!
//! Publishing is stateless (`push`). Subscribing goes through a
//! [`BrokerSubscription`] that is owned by exactly one subscription task and
//! dropped (then re-created) after a connectivity failure.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::notification::ChannelName;

/// Errors raised by broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Broker could not be reached or the connection dropped
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// A raw message popped from a channel, tagged with the channel it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoppedMessage {
    pub channel: String,
    pub payload: String,
}

impl PoppedMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Queue-based broker transport
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Backend type identifier
    fn backend_name(&self) -> &'static str;

    /// Push a payload onto the named channel
    async fn push(&self, channel: &ChannelName, payload: &str) -> Result<(), BrokerError>;

    /// Open a connection dedicated to blocking pops
    async fn connect(&self) -> Result<Box<dyn BrokerSubscription>, BrokerError>;
}

/// Exclusively owned subscriber connection
#[async_trait]
pub trait BrokerSubscription: Send {
    /// Blocking pop from the named channel.
    ///
    /// Returns `Ok(None)` when `timeout` elapses without a message.
    async fn pop(
        &mut self,
        channel: &ChannelName,
        timeout: Duration,
    ) -> Result<Option<PoppedMessage>, BrokerError>;
}
