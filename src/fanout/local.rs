//! Local-only fan-out store (single instance)

use async_trait::async_trait;

use super::traits::FanoutStore;
use super::types::{FanoutBackend, FanoutEnvelope, FanoutError};

pub struct LocalFanout {
    instance_id: String,
}

impl LocalFanout {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }
}

#[async_trait]
impl FanoutStore for LocalFanout {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn backend_type(&self) -> FanoutBackend {
        FanoutBackend::Local
    }

    async fn publish(&self, _envelope: &FanoutEnvelope) -> Result<(), FanoutError> {
        // Nobody else to tell
        Ok(())
    }
}
