//! Entry point other parts of the application use to notify a recipient.
//!
//! Delivery is fire-and-forget: callers never learn whether any connection
//! received the message, and no error ever reaches them.

use std::sync::Arc;

use crate::broker::BrokerClient;
use crate::config::DeliveryMode;

use super::{ChannelName, DeliveryDispatcher, Envelope, RecipientId, StatusMessage};

#[derive(Clone)]
pub struct Notifier {
    mode: DeliveryMode,
    channel: ChannelName,
    broker: Arc<BrokerClient>,
    dispatcher: Arc<DeliveryDispatcher>,
}

impl Notifier {
    pub fn new(
        mode: DeliveryMode,
        channel: ChannelName,
        broker: Arc<BrokerClient>,
        dispatcher: Arc<DeliveryDispatcher>,
    ) -> Self {
        Self {
            mode,
            channel,
            broker,
            dispatcher,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Send a status message to every live connection of `recipient` without waiting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, recipient: RecipientId, message: StatusMessage) {
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.deliver(recipient, message).await;
        });
    }

    /// Same routing as [`notify`](Self::notify) but completes once the
    /// message has been published (or written locally).
    pub async fn deliver(&self, recipient: RecipientId, message: StatusMessage) {
        match self.mode {
            DeliveryMode::Broker => {
                let envelope = Envelope::new(recipient, message);
                self.broker.publish(&self.channel, &envelope).await;
            }
            DeliveryMode::Local => {
                self.dispatcher.send_to_recipient(&recipient, &message).await;
            }
        }
    }

    /// Push a status message to every connection held by this process
    pub fn notify_all(&self, message: StatusMessage) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.broadcast(&message).await;
        });
    }
}
