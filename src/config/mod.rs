mod settings;

pub use settings::{
    FanoutConfig, LogConfig, LogFormat, OtelConfig, RoomsConfig, ServerConfig, Settings,
    ShutdownSettings, WebSocketConfig,
};
