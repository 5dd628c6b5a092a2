//! Cross-instance fan-out of room broadcasts
//!
//! A single instance uses [`LocalFanout`], which forwards nothing. With
//! `fanout.enabled`, broadcasts are published on a Redis channel and a
//! [`FanoutSubscriber`] delivers broadcasts from other instances to local
//! room members.

mod backoff;
mod health;
mod local;
mod redis_store;
mod subscriber;
mod traits;
mod types;

use std::sync::Arc;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use health::{FanoutHealth, FanoutHealthStats, FanoutHealthStatus};
pub use local::LocalFanout;
pub use redis_store::RedisFanout;
pub use subscriber::FanoutSubscriber;
pub use traits::FanoutStore;
pub use types::{FanoutBackend, FanoutEnvelope, FanoutError};

use crate::config::FanoutConfig;

/// Create a fan-out store based on configuration
pub fn create_fanout_store(config: &FanoutConfig, instance_id: &str) -> Arc<dyn FanoutStore> {
    if !config.enabled {
        tracing::info!("Fan-out disabled, using local store");
        return Arc::new(LocalFanout::new(instance_id));
    }

    match RedisFanout::new(config, instance_id) {
        Ok(store) => {
            tracing::info!(
                instance_id = %instance_id,
                channel = %config.channel,
                "Creating Redis fan-out store"
            );
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Fan-out enabled but Redis URL is invalid, falling back to local store"
            );
            Arc::new(LocalFanout::new(instance_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_local_store_when_disabled() {
        let store = create_fanout_store(&FanoutConfig::default(), "relay-a");
        assert!(!store.is_enabled());
        assert_eq!(store.backend_type(), FanoutBackend::Local);
    }

    #[test]
    fn test_create_redis_store_when_enabled() {
        let config = FanoutConfig {
            enabled: true,
            ..Default::default()
        };
        let store = create_fanout_store(&config, "relay-a");
        assert!(store.is_enabled());
        assert_eq!(store.backend_type(), FanoutBackend::Redis);
        assert_eq!(store.instance_id(), "relay-a");
    }

    #[test]
    fn test_invalid_url_falls_back_to_local() {
        let config = FanoutConfig {
            enabled: true,
            url: "::nope::".to_string(),
            ..Default::default()
        };
        let store = create_fanout_store(&config, "relay-a");
        assert_eq!(store.backend_type(), FanoutBackend::Local);
    }
}
