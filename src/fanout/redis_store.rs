//! Redis pub/sub fan-out store

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;

use crate::config::FanoutConfig;

use super::traits::FanoutStore;
use super::types::{FanoutBackend, FanoutEnvelope, FanoutError};

/// Publishes room broadcasts on a Redis channel shared by all instances
pub struct RedisFanout {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    channel: String,
    instance_id: String,
}

impl RedisFanout {
    pub fn new(config: &FanoutConfig, instance_id: impl Into<String>) -> Result<Self, FanoutError> {
        Ok(Self {
            client: redis::Client::open(config.url.as_str())?,
            connection: OnceCell::new(),
            channel: config.channel.clone(),
            instance_id: instance_id.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn connection(&self) -> Result<ConnectionManager, FanoutError> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl FanoutStore for RedisFanout {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn backend_type(&self) -> FanoutBackend {
        FanoutBackend::Redis
    }

    async fn publish(&self, envelope: &FanoutEnvelope) -> Result<(), FanoutError> {
        let payload = envelope.encode()?;
        let mut conn = self.connection().await?;
        let _: () = conn.publish(&self.channel, payload).await?;

        tracing::trace!(room = %envelope.room, channel = %self.channel, "Published fan-out envelope");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_does_not_connect() {
        let config = FanoutConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".to_string(),
            channel: "test:rooms".to_string(),
        };
        let store = RedisFanout::new(&config, "relay-a").unwrap();
        assert!(store.is_enabled());
        assert_eq!(store.backend_type(), FanoutBackend::Redis);
        assert_eq!(store.channel(), "test:rooms");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let config = FanoutConfig {
            enabled: true,
            url: "not a url".to_string(),
            channel: "test:rooms".to_string(),
        };
        assert!(matches!(
            RedisFanout::new(&config, "relay-a"),
            Err(FanoutError::Redis(_))
        ));
    }
}
