use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;

use crate::config::FanoutConfig;
use crate::relay::Relay;

use super::backoff::ExponentialBackoff;
use super::health::FanoutHealth;
use super::types::FanoutEnvelope;

/// Receives broadcasts published by other instances and delivers them to
/// local room members
pub struct FanoutSubscriber {
    config: FanoutConfig,
    relay: Arc<Relay>,
    health: Arc<FanoutHealth>,
    shutdown: broadcast::Receiver<()>,
}

enum LoopExit {
    Shutdown,
    StreamEnded,
}

impl FanoutSubscriber {
    pub fn new(
        config: FanoutConfig,
        relay: Arc<Relay>,
        health: Arc<FanoutHealth>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            relay,
            health,
            shutdown,
        }
    }

    /// Run until shutdown, reconnecting with backoff when the subscription drops
    pub async fn run(mut self) {
        if !self.config.enabled {
            tracing::info!("Fan-out disabled, subscriber not started");
            return;
        }

        tracing::info!(channel = %self.config.channel, "Starting fan-out subscriber");
        let mut backoff = ExponentialBackoff::new();

        loop {
            match self.subscribe_once(&mut backoff).await {
                Ok(LoopExit::Shutdown) => break,
                Ok(LoopExit::StreamEnded) => {
                    tracing::warn!("Fan-out message stream ended");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Fan-out subscription error");
                }
            }

            self.health.set_reconnecting();
            let delay = backoff.next_delay();
            tracing::info!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting fan-out subscriber"
            );

            tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Fan-out subscriber stopped");
    }

    async fn subscribe_once(&mut self, backoff: &mut ExponentialBackoff) -> anyhow::Result<LoopExit> {
        let client = redis::Client::open(self.config.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&self.config.channel).await?;

        self.health.set_connected();
        backoff.reset();
        tracing::info!(channel = %self.config.channel, "Fan-out subscription established");

        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Fan-out subscriber received shutdown signal");
                    return Ok(LoopExit::Shutdown);
                }
                msg = messages.next() => {
                    let Some(msg) = msg else {
                        return Ok(LoopExit::StreamEnded);
                    };

                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to get fan-out payload");
                            continue;
                        }
                    };

                    self.handle_payload(&payload).await;
                }
            }
        }
    }

    async fn handle_payload(&self, payload: &str) {
        let envelope = match FanoutEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed fan-out envelope");
                return;
            }
        };

        let origin = envelope.origin.clone();
        let room = envelope.room.clone();
        if let Some(report) = self.relay.deliver_remote(envelope).await {
            tracing::debug!(
                origin = %origin,
                room = %room,
                delivered = report.delivered,
                failed = report.failed,
                "Delivered remote broadcast"
            );
        }
    }
}
