mod settings;

pub use settings::{
    BrokerBackend, BrokerConfig, DeliveryMode, JwtConfig, OtelConfig, ServerConfig, Settings,
    WebSocketConfig,
};
