//! Fan-out envelope, backend and error types

use serde::{Deserialize, Serialize};

use crate::connection_manager::ConnectionId;

/// A room broadcast forwarded to other relay instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutEnvelope {
    /// Instance that produced the broadcast
    pub origin: String,
    /// Target room
    pub room: String,
    /// Connection excluded from delivery, if any
    pub exclude: Option<ConnectionId>,
    /// The serialized message payload (JSON string of ServerMessage)
    pub payload: String,
}

impl FanoutEnvelope {
    pub fn encode(&self) -> Result<String, FanoutError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, FanoutError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Error type for fan-out store operations
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Backend type for the fan-out store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutBackend {
    /// Single instance, nothing is forwarded
    Local,
    /// Redis pub/sub
    Redis,
}

impl FanoutBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanoutBackend::Local => "local",
            FanoutBackend::Redis => "redis",
        }
    }
}
