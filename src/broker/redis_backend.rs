//! Redis list transport: `RPUSH` to publish, `BLPOP` to subscribe.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, IntoConnectionInfo};

use crate::config::BrokerConfig;
use crate::notification::ChannelName;

use super::transport::{BrokerError, BrokerSubscription, BrokerTransport, PoppedMessage};

/// Redis-backed broker.
///
/// Each publish opens a fresh connection so publishers never contend on a
/// shared handle; each subscription owns its own connection.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let mut info = config.url.as_str().into_connection_info()?;
        if config.username.is_some() {
            info.redis.username = config.username.clone();
        }
        if config.password.is_some() {
            info.redis.password = config.password.clone();
        }

        let client = redis::Client::open(info)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl BrokerTransport for RedisBroker {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn push(&self, channel: &ChannelName, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: () = conn.rpush(channel.as_str(), payload).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        let conn = self.connection().await?;
        Ok(Box::new(RedisSubscription { conn }))
    }
}

struct RedisSubscription {
    conn: MultiplexedConnection,
}

#[async_trait]
impl BrokerSubscription for RedisSubscription {
    async fn pop(
        &mut self,
        channel: &ChannelName,
        timeout: Duration,
    ) -> Result<Option<PoppedMessage>, BrokerError> {
        // BLPOP treats 0 as "block forever"; keep at least one second so the
        // caller gets control back regularly
        let timeout_secs = timeout.as_secs().max(1);

        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(channel.as_str())
            .arg(timeout_secs)
            .query_async(&mut self.conn)
            .await?;

        Ok(popped.map(|(channel, payload)| PoppedMessage::new(channel, payload)))
    }
}
