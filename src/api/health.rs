//! Health check and statistics endpoints.

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::ConnectionId;
use crate::fanout::{FanoutHealthStats, FanoutHealthStatus};
use crate::relay::RelayStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub hostname: String,
    pub connections: usize,
    pub active_clients: Vec<ConnectionId>,
    pub version: String,
    pub uptime_seconds: u64,
    pub fanout: FanoutHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct FanoutHealthResponse {
    pub enabled: bool,
    pub backend: String,
    #[serde(flatten)]
    pub health: FanoutHealthStats,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: usize,
    pub rooms: BTreeMap<String, usize>,
    pub relay: RelayStatsSnapshot,
}

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: format!("WebSocket server is running on {}", state.instance_name),
    })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.relay.registry();
    let fanout = state.relay.fanout();
    let fanout_health = state.fanout_health.stats();

    let status = match fanout_health.status {
        FanoutHealthStatus::Reconnecting => "degraded",
        FanoutHealthStatus::Disabled | FanoutHealthStatus::Healthy => "healthy",
    };

    let active_clients = registry.snapshot();

    Json(HealthResponse {
        status: status.to_string(),
        hostname: state.instance_name.to_string(),
        connections: active_clients.len(),
        active_clients,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        fanout: FanoutHealthResponse {
            enabled: fanout.is_enabled(),
            backend: fanout.backend_type().as_str().to_string(),
            health: fanout_health,
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let rooms = state
        .relay
        .rooms()
        .rooms()
        .into_iter()
        .map(|info| (info.name, info.member_count))
        .collect();

    Json(StatsResponse {
        connections: state.relay.registry().len(),
        rooms,
        relay: state.relay.stats(),
    })
}
