//! Fan-out store trait definition

use async_trait::async_trait;

use super::types::{FanoutBackend, FanoutEnvelope, FanoutError};

/// Shared store that forwards room broadcasts between relay instances
#[async_trait]
pub trait FanoutStore: Send + Sync {
    /// Identity of this instance; envelopes it published carry it as origin
    fn instance_id(&self) -> &str;

    /// Whether broadcasts are forwarded at all
    fn is_enabled(&self) -> bool;

    /// Get the backend type
    fn backend_type(&self) -> FanoutBackend;

    /// Forward a room broadcast to the other instances
    async fn publish(&self, envelope: &FanoutEnvelope) -> Result<(), FanoutError>;
}
