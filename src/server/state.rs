use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;

use crate::config::Settings;
use crate::fanout::{create_fanout_store, FanoutHealth};
use crate::relay::Relay;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub relay: Arc<Relay>,
    pub fanout_health: Arc<FanoutHealth>,
    /// Name reported to clients and on `/health`
    pub instance_name: Arc<str>,
    pub start_time: Instant,
    /// Fired once when the server begins shutting down
    pub shutdown_tx: broadcast::Sender<()>,
    /// Upgraded WebSocket connection tasks, awaited on shutdown
    pub connection_tasks: TaskTracker,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let instance_name = settings.instance_name();
        // Per-process origin tag on fan-out envelopes
        let instance_id = format!("{}-{}", instance_name, uuid::Uuid::new_v4().simple());
        let fanout = create_fanout_store(&settings.fanout, &instance_id);
        let fanout_health = Arc::new(FanoutHealth::new(fanout.is_enabled()));
        let relay = Arc::new(Relay::from_settings(&settings, fanout));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            settings: Arc::new(settings),
            relay,
            fanout_health,
            instance_name: instance_name.into(),
            start_time: Instant::now(),
            shutdown_tx,
            connection_tasks: TaskTracker::new(),
        }
    }
}
