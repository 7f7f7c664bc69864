use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::metrics::BrokerMetrics;
use crate::notification::{codec, ChannelName, Envelope};
use crate::shutdown::ShutdownSignal;

use super::backoff::{Backoff, BackoffConfig};
use super::health::BrokerHealth;
use super::transport::{BrokerError, BrokerSubscription, BrokerTransport, PoppedMessage};

/// Default upper bound on one blocking pop before the loop re-checks shutdown
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives raw payloads surfaced by the subscription loop
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: String);
}

/// Publish/subscribe client over a queue-based broker transport
pub struct BrokerClient {
    transport: Arc<dyn BrokerTransport>,
    backoff: BackoffConfig,
    pop_timeout: Duration,
    health: Arc<BrokerHealth>,
}

impl BrokerClient {
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        Self::with_config(transport, BackoffConfig::default(), DEFAULT_POP_TIMEOUT)
    }

    pub fn with_config(
        transport: Arc<dyn BrokerTransport>,
        backoff: BackoffConfig,
        pop_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            backoff,
            pop_timeout,
            health: Arc::new(BrokerHealth::new()),
        }
    }

    pub fn health(&self) -> Arc<BrokerHealth> {
        Arc::clone(&self.health)
    }

    pub fn backend_name(&self) -> &'static str {
        self.transport.backend_name()
    }

    /// Serialize an envelope and push it onto `channel`.
    ///
    /// Best-effort: on failure the message is logged and dropped.
    pub async fn publish(&self, channel: &ChannelName, envelope: &Envelope) {
        let payload = match codec::encode_envelope(envelope) {
            Ok(p) => p,
            Err(e) => {
                BrokerMetrics::record_publish_dropped();
                tracing::error!(
                    error = %e,
                    channel = %channel,
                    recipient = %envelope.recipient,
                    "Failed to encode notification, dropping it"
                );
                return;
            }
        };
        self.publish_raw(channel, &payload).await;
    }

    /// Push an already encoded payload; best-effort like [`publish`](Self::publish)
    pub async fn publish_raw(&self, channel: &ChannelName, payload: &str) {
        match self.transport.push(channel, payload).await {
            Ok(()) => {
                BrokerMetrics::record_published();
                tracing::debug!(channel = %channel, "Published message to channel");
            }
            Err(e) => {
                BrokerMetrics::record_publish_dropped();
                tracing::error!(
                    error = %e,
                    channel = %channel,
                    "Failed to publish message, dropping it"
                );
            }
        }
    }

    /// Pop messages from `channel` and hand each to `handler` until `shutdown` fires.
    ///
    /// Connectivity failures drop the subscriber connection, wait out the
    /// backoff and reconnect; they never end the loop.
    #[tracing::instrument(name = "broker.subscribe", skip_all, fields(channel = %channel, backend = self.backend_name()))]
    pub async fn subscribe(
        &self,
        channel: &ChannelName,
        handler: &dyn MessageHandler,
        shutdown: &ShutdownSignal,
    ) {
        tracing::info!("Starting broker subscription");

        let mut backoff = Backoff::with_config(self.backoff.clone());
        let mut subscription: Option<Box<dyn BrokerSubscription>> = None;

        while !shutdown.is_triggered() {
            let outcome = match subscription.as_mut() {
                Some(sub) => tokio::select! {
                    _ = shutdown.triggered() => break,
                    popped = sub.pop(channel, self.pop_timeout) => popped,
                },
                None => {
                    let connected = tokio::select! {
                        _ = shutdown.triggered() => break,
                        connected = self.transport.connect() => connected,
                    };
                    match connected {
                        Ok(sub) => {
                            self.mark_connected(&mut backoff);
                            tracing::info!("Broker subscription established");
                            subscription = Some(sub);
                            continue;
                        }
                        Err(e) => Err(e),
                    }
                }
            };

            match outcome {
                Ok(Some(message)) => {
                    self.mark_connected(&mut backoff);
                    self.deliver(channel, message, handler).await;
                }
                Ok(None) => self.mark_connected(&mut backoff),
                Err(e) => {
                    subscription = None;
                    if !self.wait_before_retry(&e, &mut backoff, shutdown).await {
                        break;
                    }
                }
            }
        }

        self.health.set_stopped();
        tracing::info!("Broker subscription stopped");
    }

    fn mark_connected(&self, backoff: &mut Backoff) {
        if !self.health.is_healthy() {
            self.health.set_connected();
            BrokerMetrics::record_connected();
        }
        backoff.reset();
    }

    async fn deliver(&self, channel: &ChannelName, message: PoppedMessage, handler: &dyn MessageHandler) {
        BrokerMetrics::record_received();

        if channel.as_str() != message.channel {
            BrokerMetrics::record_discarded();
            tracing::warn!(
                expected = %channel,
                received = %message.channel,
                "Discarding message popped from an unexpected channel"
            );
            return;
        }

        tracing::debug!(channel = %channel, "Received message from channel");
        handler.handle(message.payload).await;
    }

    /// Log the failure and sleep out the backoff. Returns false if shutdown fired meanwhile.
    async fn wait_before_retry(
        &self,
        error: &BrokerError,
        backoff: &mut Backoff,
        shutdown: &ShutdownSignal,
    ) -> bool {
        self.health.record_failure();
        BrokerMetrics::record_reconnect_attempt();

        let delay = backoff.next_delay();
        tracing::warn!(
            error = %error,
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Lost connection to broker, reconnecting after backoff"
        );

        tokio::select! {
            _ = shutdown.triggered() => {
                tracing::info!("Shutdown requested during backoff");
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::notification::{RecipientId, StatusMessage};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Handler that forwards payloads to a channel
    struct Collect(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl MessageHandler for Collect {
        async fn handle(&self, payload: String) {
            let _ = self.0.send(payload);
        }
    }

    enum Step {
        Fail,
        Pop(PoppedMessage),
    }

    /// Transport whose pops follow a script, then block until timeout
    struct ScriptedTransport {
        steps: Arc<Mutex<VecDeque<Step>>>,
        connects: Arc<Mutex<u32>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Arc::new(Mutex::new(steps.into())),
                connects: Arc::new(Mutex::new(0)),
            }
        }
    }

    struct ScriptedSubscription {
        steps: Arc<Mutex<VecDeque<Step>>>,
    }

    #[async_trait]
    impl BrokerTransport for ScriptedTransport {
        fn backend_name(&self) -> &'static str {
            "scripted"
        }

        async fn push(&self, _channel: &ChannelName, _payload: &str) -> Result<(), BrokerError> {
            Err(BrokerError::Unreachable("scripted transport cannot publish".to_string()))
        }

        async fn connect(&self) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
            *self.connects.lock().unwrap() += 1;
            Ok(Box::new(ScriptedSubscription {
                steps: self.steps.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrokerSubscription for ScriptedSubscription {
        async fn pop(
            &mut self,
            _channel: &ChannelName,
            timeout: Duration,
        ) -> Result<Option<PoppedMessage>, BrokerError> {
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Fail) => Err(BrokerError::Unreachable("connection reset".to_string())),
                Some(Step::Pop(message)) => Ok(Some(message)),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }
    }

    fn channel() -> ChannelName {
        ChannelName::new("notify_user")
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_three_backoffs_then_delivery() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Step::Fail,
            Step::Fail,
            Step::Fail,
            Step::Pop(PoppedMessage::new("notify_user", "fourth")),
        ]));
        let connects = transport.connects.clone();
        let client = Arc::new(BrokerClient::new(transport));
        let health = client.health();
        let shutdown = ShutdownSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let started = tokio::time::Instant::now();
        let task = {
            let client = client.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { client.subscribe(&channel(), &Collect(tx), &shutdown).await })
        };

        assert_eq!(rx.recv().await.as_deref(), Some("fourth"));
        assert!(started.elapsed() >= Duration::from_secs(30));

        let stats = health.stats();
        assert_eq!(stats.total_failures, 3);
        assert_eq!(stats.total_reconnections, 3);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(*connects.lock().unwrap(), 4);

        shutdown.trigger();
        task.await.unwrap();
        assert_eq!(health.status(), crate::broker::BrokerHealthStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_channel_messages_are_discarded() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Step::Pop(PoppedMessage::new("other_channel", "foreign")),
            Step::Pop(PoppedMessage::new("notify_user", "ours")),
        ]));
        let client = BrokerClient::new(transport);
        let shutdown = ShutdownSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ch = channel();
        let handler = Collect(tx);
        let run = client.subscribe(&ch, &handler, &shutdown);
        let check = async {
            assert_eq!(rx.recv().await.as_deref(), Some("ours"));
            shutdown.trigger();
        };
        tokio::join!(run, check);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_ends_loop_promptly() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let client = BrokerClient::new(Arc::new(broker));
        let shutdown = ShutdownSignal::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let started = tokio::time::Instant::now();
        let ch = channel();
        let handler = Collect(tx);
        let run = client.subscribe(&ch, &handler, &shutdown);
        let stop = async {
            tokio::time::sleep(Duration::from_secs(15)).await;
            shutdown.trigger();
        };
        tokio::join!(run, stop);

        // Stopped mid-way through the second backoff rather than after it
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(client.health().stats().total_failures, 2);
    }

    #[tokio::test]
    async fn test_subscribe_returns_immediately_when_already_shut_down() {
        let client = BrokerClient::new(Arc::new(MemoryBroker::new()));
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let (tx, _rx) = mpsc::unbounded_channel();
        client.subscribe(&channel(), &Collect(tx), &shutdown).await;
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let client = BrokerClient::new(Arc::new(broker.clone()));

        let envelope = Envelope::new(RecipientId::new("u1"), StatusMessage::success("Saved"));
        client.publish(&channel(), &envelope).await;

        broker.set_available(true);
        assert!(broker.is_empty(&channel()));
    }

    #[tokio::test]
    async fn test_publish_pushes_encoded_envelope() {
        let broker = MemoryBroker::new();
        let client = BrokerClient::new(Arc::new(broker.clone()));

        let envelope = Envelope::new(RecipientId::new("u1"), StatusMessage::success("Saved"));
        client.publish(&channel(), &envelope).await;

        let mut sub = broker.connect().await.unwrap();
        let popped = sub.pop(&channel(), Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(codec::decode_envelope(&popped.payload).unwrap(), envelope);
    }
}
