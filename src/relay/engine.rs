use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::timeout;

use crate::config::Settings;
use crate::connection_manager::{
    ConnectionHandle, ConnectionId, JoinOutcome, Registry, RoomTable,
};
use crate::fanout::{FanoutEnvelope, FanoutStore};
use crate::websocket::{OutboundMessage, ServerMessage};

use super::stats::{RelayStats, RelayStatsSnapshot};

/// Outcome of one broadcast call, follow-up notifications included
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastReport {
    /// Members the message was attempted to
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Members removed because delivery to them failed
    pub evicted: Vec<ConnectionId>,
}

impl BroadcastReport {
    fn absorb(&mut self, other: BroadcastReport) {
        self.recipients += other.recipients;
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.evicted.extend(other.evicted);
    }
}

struct PendingBroadcast {
    room: String,
    message: OutboundMessage,
    exclude: Option<ConnectionId>,
    publish: bool,
}

/// Room broadcast engine.
///
/// Owns the registry and room table for the server's lifetime and is the
/// only place connections are removed from both.
pub struct Relay {
    registry: Arc<Registry>,
    rooms: Arc<RoomTable>,
    fanout: Arc<dyn FanoutStore>,
    send_timeout: Duration,
    default_room: String,
    stats: RelayStats,
}

impl Relay {
    pub fn new(
        registry: Arc<Registry>,
        rooms: Arc<RoomTable>,
        fanout: Arc<dyn FanoutStore>,
        send_timeout: Duration,
        default_room: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            rooms,
            fanout,
            send_timeout,
            default_room: default_room.into(),
            stats: RelayStats::default(),
        }
    }

    pub fn from_settings(settings: &Settings, fanout: Arc<dyn FanoutStore>) -> Self {
        let mut predeclared = settings.rooms.predeclared.clone();
        predeclared.push(settings.rooms.default_room.clone());

        Self::new(
            Arc::new(Registry::new()),
            Arc::new(RoomTable::with_rooms(predeclared)),
            fanout,
            Duration::from_millis(settings.websocket.send_timeout_ms),
            settings.rooms.default_room.clone(),
        )
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn rooms(&self) -> &Arc<RoomTable> {
        &self.rooms
    }

    pub fn fanout(&self) -> &Arc<dyn FanoutStore> {
        &self.fanout
    }

    pub fn default_room(&self) -> &str {
        &self.default_room
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Move a connection into a room
    pub fn join(&self, handle: &ConnectionHandle, room: &str) -> Option<JoinOutcome> {
        let outcome = self.rooms.join(handle, room);
        if outcome.is_none() {
            tracing::warn!(
                connection_id = %handle.id,
                room = %room,
                state = ?handle.state(),
                "Join skipped, connection is no longer open"
            );
        }
        outcome
    }

    /// Remove a connection from its room and the registry.
    ///
    /// Returns the room it was in, so the caller can announce the departure.
    /// Returns `None` when someone else (an eviction) already owns the removal.
    pub fn disconnect(&self, handle: &ConnectionHandle) -> Option<String> {
        if !handle.begin_close() {
            return None;
        }
        let room = self.rooms.leave(handle.id);
        self.registry.unregister(handle.id);
        room
    }

    /// Forcibly remove a member whose delivery failed. Returns the room it was
    /// removed from when this call performed the removal.
    pub fn evict(&self, handle: &ConnectionHandle) -> Option<String> {
        if !handle.begin_close() {
            return None;
        }
        let room = self.rooms.leave(handle.id);
        self.registry.unregister(handle.id);
        self.stats.evicted.fetch_add(1, Ordering::Relaxed);

        tracing::warn!(
            connection_id = %handle.id,
            room = ?room,
            "Evicted connection after failed delivery"
        );
        room
    }

    /// Queue a reply for a single connection, bounded by the send timeout.
    ///
    /// Returns false when the queue is closed or stayed full, in which case
    /// the caller should stop serving the connection.
    pub async fn send_direct(&self, handle: &ConnectionHandle, message: ServerMessage) -> bool {
        match timeout(self.send_timeout, handle.send(message)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                tracing::debug!(connection_id = %handle.id, "Reply dropped, queue closed");
                false
            }
            Err(_) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    connection_id = %handle.id,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Timed out queueing reply"
                );
                false
            }
        }
    }

    /// Deliver `message` to every member of `room` except `exclude`, and
    /// forward it to other instances when a fan-out store is enabled.
    #[tracing::instrument(
        name = "relay.broadcast",
        skip(self, message),
        fields(message_type = message.kind())
    )]
    pub async fn broadcast(
        &self,
        room: &str,
        message: &ServerMessage,
        exclude: Option<ConnectionId>,
    ) -> BroadcastReport {
        let outbound = match OutboundMessage::preserialized(message) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to pre-serialize message, falling back to per-connection serialization");
                OutboundMessage::Raw(message.clone())
            }
        };

        self.run(PendingBroadcast {
            room: room.to_string(),
            message: outbound,
            exclude,
            publish: true,
        })
        .await
    }

    /// Deliver a broadcast that originated on another instance
    pub async fn deliver_remote(&self, envelope: FanoutEnvelope) -> Option<BroadcastReport> {
        if envelope.origin == self.fanout.instance_id() {
            return None;
        }
        self.stats.remote_received.fetch_add(1, Ordering::Relaxed);

        let report = self
            .run(PendingBroadcast {
                room: envelope.room,
                message: OutboundMessage::Serialized(envelope.payload.into()),
                exclude: envelope.exclude,
                publish: false,
            })
            .await;
        Some(report)
    }

    /// Work through a broadcast and the `user_left` notices its evictions
    /// cause, one at a time
    async fn run(&self, first: PendingBroadcast) -> BroadcastReport {
        let mut pending = VecDeque::from([first]);
        let mut report = BroadcastReport::default();

        while let Some(job) = pending.pop_front() {
            self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);

            if job.publish {
                self.publish_remote(&job).await;
            }

            let (delivery, evicted) = self.deliver_local(&job.room, &job.message, job.exclude).await;

            for (connection_id, room) in &evicted {
                match OutboundMessage::preserialized(&ServerMessage::user_left(*connection_id)) {
                    Ok(message) => pending.push_back(PendingBroadcast {
                        room: room.clone(),
                        message,
                        exclude: None,
                        publish: true,
                    }),
                    Err(e) => {
                        tracing::error!(error = %e, connection_id = %connection_id, "Failed to build user_left notice");
                    }
                }
            }

            report.absorb(delivery);
        }

        report
    }

    /// Send to the local members of a room. Each recipient is attempted
    /// concurrently and bounded by the send timeout; failures evict.
    async fn deliver_local(
        &self,
        room: &str,
        message: &OutboundMessage,
        exclude: Option<ConnectionId>,
    ) -> (BroadcastReport, Vec<(ConnectionId, String)>) {
        let recipients: Vec<Arc<ConnectionHandle>> = self
            .rooms
            .members(room)
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| self.registry.lookup(id))
            .collect();

        let mut report = BroadcastReport {
            recipients: recipients.len(),
            ..Default::default()
        };
        let mut evicted = Vec::new();

        if recipients.is_empty() {
            return (report, evicted);
        }

        let send_timeout = self.send_timeout;
        let mut sends: FuturesUnordered<_> = recipients
            .into_iter()
            .map(|handle| {
                let msg = message.clone();
                async move {
                    let result = timeout(send_timeout, handle.send_preserialized(msg)).await;
                    (handle, result)
                }
            })
            .collect();

        while let Some((handle, result)) = sends.next().await {
            match result {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(_)) => {
                    report.failed += 1;
                    tracing::warn!(connection_id = %handle.id, room = %room, "Recipient queue closed");
                    if let Some(left) = self.evict(&handle) {
                        report.evicted.push(handle.id);
                        evicted.push((handle.id, left));
                    }
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::warn!(
                        connection_id = %handle.id,
                        room = %room,
                        timeout_ms = send_timeout.as_millis() as u64,
                        "Timed out delivering to recipient"
                    );
                    if let Some(left) = self.evict(&handle) {
                        report.evicted.push(handle.id);
                        evicted.push((handle.id, left));
                    }
                }
            }
        }

        self.stats
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        tracing::debug!(
            room = %room,
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast delivered"
        );

        (report, evicted)
    }

    async fn publish_remote(&self, job: &PendingBroadcast) {
        if !self.fanout.is_enabled() {
            return;
        }

        let payload = match job.message.to_json() {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => {
                tracing::error!(error = %e, room = %job.room, "Failed to serialize fan-out payload");
                return;
            }
            None => return,
        };

        let envelope = FanoutEnvelope {
            origin: self.fanout.instance_id().to_string(),
            room: job.room.clone(),
            exclude: job.exclude,
            payload,
        };

        match self.fanout.publish(&envelope).await {
            Ok(()) => {
                self.stats.remote_published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats
                    .remote_publish_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, room = %job.room, "Failed to publish broadcast to fan-out store");
            }
        }
    }
}
