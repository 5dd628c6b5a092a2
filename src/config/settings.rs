use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Identity reported to clients and on the health endpoint.
    /// Falls back to the OS hostname.
    #[serde(default)]
    pub instance_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Room used when a join or message does not name one
    #[serde(default = "default_room")]
    pub default_room: String,
    /// Rooms that exist from startup, even with no members
    #[serde(default = "default_predeclared_rooms")]
    pub predeclared: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Capacity of each connection's outbound queue
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
    /// Upper bound on waiting for a single recipient's queue during a broadcast
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Maximum inbound frame size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Time allowed for the writer to flush the close frame
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FanoutConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_fanout_channel")]
    pub channel: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSettings {
    /// Seconds to wait for connections to tear down after the shutdown signal
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
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

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_room() -> String {
    "general".to_string()
}

fn default_predeclared_rooms() -> Vec<String> {
    vec![
        "general".to_string(),
        "support".to_string(),
        "random".to_string(),
    ]
}

fn default_channel_buffer_size() -> usize {
    64
}

fn default_send_timeout_ms() -> u64 {
    1000
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_close_timeout_ms() -> u64 {
    2000
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_fanout_channel() -> String {
    "relay:rooms".to_string()
}

fn default_drain_timeout_secs() -> u64 {
    10
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "room-relay".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", 8000)?
            .set_default("rooms.default_room", default_room())?
            .set_default("fanout.url", default_redis_url())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // RELAY_SERVER__PORT, RELAY_FANOUT__ENABLED, RELAY_ROOMS__PREDECLARED=a,b,c ...
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .with_list_parse_key("rooms.predeclared"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Name this process reports to clients: the configured instance name,
    /// else the OS hostname.
    pub fn instance_name(&self) -> String {
        if let Some(name) = self.server.instance_name.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }

        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            instance_name: None,
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            default_room: default_room(),
            predeclared: default_predeclared_rooms(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: default_channel_buffer_size(),
            send_timeout_ms: default_send_timeout_ms(),
            max_message_size: default_max_message_size(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            channel: default_fanout_channel(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout_secs(),
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
