use std::sync::Arc;
use std::time::Instant;

use crate::auth::{IdentityProvider, JwtValidator};
use crate::broker::{create_broker, BackoffConfig, BrokerClient, BrokerTransport};
use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::error::AppError;
use crate::notification::{ChannelName, DeliveryDispatcher, Notifier};
use crate::shutdown::ShutdownSignal;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub identity: Arc<dyn IdentityProvider>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<DeliveryDispatcher>,
    pub broker: Arc<BrokerClient>,
    pub notifier: Notifier,
    pub shutdown: ShutdownSignal,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        let transport = create_broker(&settings.broker)?;
        let identity = Arc::new(JwtValidator::new(&settings.jwt));
        Ok(Self::with_components(settings, transport, identity))
    }

    /// Wire the relay around an already built transport and identity provider
    pub fn with_components(
        settings: Settings,
        transport: Arc<dyn BrokerTransport>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::with_send_timeout(
            settings.websocket.send_timeout(),
        ));
        let dispatcher = Arc::new(DeliveryDispatcher::new(registry.clone()));
        let broker = Arc::new(BrokerClient::with_config(
            transport,
            BackoffConfig::fixed(settings.broker.backoff()),
            settings.broker.pop_timeout(),
        ));
        let notifier = Notifier::new(
            settings.broker.delivery_mode,
            ChannelName::new(settings.broker.notify_channel.as_str()),
            broker.clone(),
            dispatcher.clone(),
        );

        Self {
            settings: Arc::new(settings),
            identity,
            registry,
            dispatcher,
            broker,
            notifier,
            shutdown: ShutdownSignal::new(),
            start_time: Instant::now(),
        }
    }

    pub fn notify_channel(&self) -> ChannelName {
        ChannelName::new(self.settings.broker.notify_channel.as_str())
    }
}
