//! Graceful shutdown for the relay.
//!
//! 1. Signal every connection task and the fan-out subscriber to stop
//! 2. Wait (bounded) for connection tasks to tear down and leave the registry

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;

use crate::relay::Relay;

/// Coordinates shutdown of the relay
pub struct GracefulShutdown {
    relay: Arc<Relay>,
    shutdown_tx: broadcast::Sender<()>,
    /// Tracks every upgraded connection task
    connection_tasks: TaskTracker,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(
        relay: Arc<Relay>,
        shutdown_tx: broadcast::Sender<()>,
        connection_tasks: TaskTracker,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            relay,
            shutdown_tx,
            connection_tasks,
            drain_timeout,
        }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.relay.registry().len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let initial = self.relay.registry().len();

        tracing::info!(
            reason = %reason,
            connections = initial,
            tasks = self.connection_tasks.len(),
            "Starting graceful shutdown"
        );
        let signalled = self.shutdown_tx.send(()).unwrap_or(0);

        let finished = self.wait_for_connection_tasks().await;
        let remaining = self.relay.registry().len();

        let result = ShutdownResult {
            success: finished,
            tasks_signalled: signalled,
            connections_closed: initial.saturating_sub(remaining),
            connections_remaining: remaining,
            duration: start.elapsed(),
        };

        if !finished {
            tracing::warn!(
                remaining_connections = remaining,
                remaining_tasks = self.connection_tasks.len(),
                "Some connections did not close gracefully"
            );
        }

        tracing::info!(
            connections_closed = result.connections_closed,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    /// Waits until every tracked connection task has finished its teardown.
    /// Returns false when the drain timeout expired first.
    async fn wait_for_connection_tasks(&self) -> bool {
        self.connection_tasks.close();
        timeout(self.drain_timeout, self.connection_tasks.wait())
            .await
            .is_ok()
    }
}

/// Result of a graceful shutdown
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Every connection task finished before the deadline
    pub success: bool,
    /// Receivers that got the shutdown signal
    pub tasks_signalled: usize,
    pub connections_closed: usize,
    pub connections_remaining: usize,
    pub duration: Duration,
}
