use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Which broker transport backs the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    #[default]
    Redis,
    /// In-process queues; single replica only
    Memory,
}

/// How `Notifier::notify` routes a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Publish to the broker; the consuming dispatcher delivers
    #[default]
    Broker,
    /// Deliver straight to this process's registry
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub backend: BrokerBackend,
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Channel carrying per-recipient status notifications
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,
    /// Wait between reconnection attempts in seconds
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
    /// Upper bound on one blocking pop in seconds
    #[serde(default = "default_pop_timeout_seconds")]
    pub pop_timeout_seconds: u64,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
}

impl BrokerConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }

    /// Blocking pop timeout, never below one second so an idle loop still blocks
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_secs(self.pop_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Outbound buffer per connection
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Time a single write may wait on a full buffer before it counts as failed
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Registry sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

impl WebSocketConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_broker_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_notify_channel() -> String {
    "notify_user".to_string()
}

fn default_backoff_seconds() -> u64 {
    10
}

fn default_pop_timeout_seconds() -> u64 {
    5
}

fn default_channel_buffer() -> usize {
    32
}

fn default_send_timeout_ms() -> u64 {
    2000
}

fn default_sweep_interval() -> u64 {
    60 // 1 minute
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "status-relay".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        Self::load(Environment::default())
    }

    fn load(environment: Environment) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("broker.url", "redis://localhost:6379")?
            .set_default("broker.notify_channel", "notify_user")?
            .set_default("broker.backoff_seconds", 10)?
            .set_default("broker.pop_timeout_seconds", 5)?
            .set_default("websocket.channel_buffer", 32)?
            .set_default("websocket.send_timeout_ms", 2000)?
            .set_default("websocket.sweep_interval", 60)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // BROKER__URL, JWT__SECRET, WEBSOCKET__SEND_TIMEOUT_MS, ...
            .add_source(
                environment
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::default(),
            url: default_broker_url(),
            username: None,
            password: None,
            notify_channel: default_notify_channel(),
            backoff_seconds: default_backoff_seconds(),
            pop_timeout_seconds: default_pop_timeout_seconds(),
            delivery_mode: DeliveryMode::default(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            channel_buffer: default_channel_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8081);

        let broker = BrokerConfig::default();
        assert_eq!(broker.backend, BrokerBackend::Redis);
        assert_eq!(broker.notify_channel, "notify_user");
        assert_eq!(broker.backoff(), Duration::from_secs(10));
        assert_eq!(broker.delivery_mode, DeliveryMode::Broker);

        let ws = WebSocketConfig::default();
        assert_eq!(ws.send_timeout(), Duration::from_secs(2));
        assert_eq!(ws.channel_buffer, 32);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let source = r#"
            [jwt]
            secret = "s3cret"

            [broker]
            backend = "memory"
            delivery_mode = "local"
            backoff_seconds = 3
        "#;

        let settings: Settings = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.jwt.secret, "s3cret");
        assert_eq!(settings.broker.backend, BrokerBackend::Memory);
        assert_eq!(settings.broker.delivery_mode, DeliveryMode::Local);
        assert_eq!(settings.broker.backoff_seconds, 3);
        assert_eq!(settings.broker.pop_timeout_seconds, 5);
        assert_eq!(settings.server_addr(), "0.0.0.0:8081");
        assert!(!settings.otel.enabled);
    }

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().source(Some(map))
    }

    #[test]
    fn test_environment_overrides() {
        let settings = Settings::load(env(&[
            ("JWT__SECRET", "s3cret"),
            ("BROKER__URL", "redis://example:6379"),
            ("BROKER__NOTIFY_CHANNEL", "alerts"),
            ("BROKER__BACKEND", "memory"),
            ("SERVER__PORT", "9000"),
            ("WEBSOCKET__SEND_TIMEOUT_MS", "500"),
        ]))
        .unwrap();

        assert_eq!(settings.jwt.secret, "s3cret");
        assert_eq!(settings.broker.url, "redis://example:6379");
        assert_eq!(settings.broker.notify_channel, "alerts");
        assert_eq!(settings.broker.backend, BrokerBackend::Memory);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.websocket.send_timeout(), Duration::from_millis(500));
        assert!(settings.server.cors_origins.is_empty());
    }

    #[test]
    fn test_cors_origins_split_from_environment() {
        let settings = Settings::load(env(&[
            ("JWT__SECRET", "s3cret"),
            ("SERVER__CORS_ORIGINS", "https://a.example,https://b.example"),
        ]))
        .unwrap();

        assert_eq!(
            settings.server.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_zero_pop_timeout_is_clamped() {
        let broker = BrokerConfig {
            pop_timeout_seconds: 0,
            ..BrokerConfig::default()
        };
        assert_eq!(broker.pop_timeout(), Duration::from_secs(1));
    }
}
