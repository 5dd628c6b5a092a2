//! Room inspection endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connection_manager::{is_valid_room_name, ConnectionId, RoomInfo};
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomInfo>,
    pub total_rooms: usize,
}

#[derive(Debug, Serialize)]
pub struct RoomDetailResponse {
    pub name: String,
    pub member_count: usize,
    pub members: Vec<MemberInfo>,
}

#[derive(Debug, Serialize)]
pub struct MemberInfo {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// GET /api/v1/rooms - List all rooms with member counts
pub async fn list_rooms(State(state): State<AppState>) -> Json<RoomListResponse> {
    let rooms = state.relay.rooms().rooms();
    let total_rooms = rooms.len();

    Json(RoomListResponse { rooms, total_rooms })
}

/// GET /api/v1/rooms/{room} - Members of one room
pub async fn get_room(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RoomDetailResponse>> {
    if !is_valid_room_name(&name) {
        return Err(AppError::Validation(format!("Invalid room name: {}", name)));
    }

    let table = state.relay.rooms();
    if !table.contains_room(&name) {
        return Err(AppError::NotFound(format!("Room '{}' not found", name)));
    }

    // Members that unregistered between the two reads are skipped
    let registry = state.relay.registry();
    let members: Vec<MemberInfo> = table
        .members(&name)
        .into_iter()
        .filter_map(|id| registry.lookup(id))
        .map(|handle| MemberInfo {
            id: handle.id,
            connected_at: handle.connected_at,
            last_activity: handle.last_activity(),
        })
        .collect();

    Ok(Json(RoomDetailResponse {
        name,
        member_count: members.len(),
        members,
    }))
}
