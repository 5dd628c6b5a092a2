//! Room membership index.
//!
//! Two maps are kept: `assignments` (connection -> room) and `rooms`
//! (room -> members). Every mutation for a connection happens while holding
//! that connection's `assignments` entry, so joins and leaves of the same
//! connection are serialized. Locks are always taken assignments-first and a
//! `rooms` guard is never held while another `rooms` guard is acquired.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use super::types::{ConnectionHandle, ConnectionId};

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Room the connection was in before, if it differed from the new one
    pub previous: Option<String>,
    /// Members of the joined room, including the joiner
    pub members: Vec<ConnectionId>,
}

/// Room name and its member count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub name: String,
    pub member_count: usize,
}

pub struct RoomTable {
    /// room_name -> Set<connection_id>
    rooms: DashMap<String, HashSet<ConnectionId>>,
    /// connection_id -> room_name
    assignments: DashMap<ConnectionId, String>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            assignments: DashMap::new(),
        }
    }

    /// Create a table whose given rooms exist before anyone joins
    pub fn with_rooms<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = Self::new();
        for name in names {
            table.rooms.entry(name.into()).or_default();
        }
        table
    }

    /// Move a connection into `room`, leaving its previous room first.
    ///
    /// Returns `None` without touching membership if the connection is not
    /// open; the state is checked while the connection's slot is held.
    pub fn join(&self, handle: &ConnectionHandle, room: &str) -> Option<JoinOutcome> {
        let connection_id = handle.id;

        let mut slot = match self.assignments.entry(connection_id) {
            Entry::Occupied(slot) => {
                if !handle.is_open() {
                    return None;
                }
                slot
            }
            Entry::Vacant(slot) => {
                if !handle.is_open() {
                    return None;
                }
                slot.insert_entry(String::new())
            }
        };

        let previous = std::mem::replace(slot.get_mut(), room.to_string());
        let previous = if previous.is_empty() { None } else { Some(previous) };

        if let Some(old_room) = previous.as_deref().filter(|old| *old != room) {
            if let Some(mut members) = self.rooms.get_mut(old_room) {
                members.remove(&connection_id);
            }
        }

        let members = {
            let mut members = self.rooms.entry(room.to_string()).or_default();
            members.insert(connection_id);
            members.iter().copied().collect()
        };

        drop(slot);

        tracing::debug!(
            connection_id = %connection_id,
            room = %room,
            previous = ?previous,
            "Joined room"
        );

        Some(JoinOutcome {
            previous: previous.filter(|old| old != room),
            members,
        })
    }

    /// Remove a connection from whatever room it is in, returning that room
    pub fn leave(&self, connection_id: ConnectionId) -> Option<String> {
        match self.assignments.entry(connection_id) {
            Entry::Occupied(slot) => {
                if let Some(mut members) = self.rooms.get_mut(slot.get().as_str()) {
                    members.remove(&connection_id);
                }
                let room = slot.remove();
                tracing::debug!(connection_id = %connection_id, room = %room, "Left room");
                Some(room)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Copy of a room's members; empty for unknown rooms
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.assignments
            .get(&connection_id)
            .map(|room| room.value().clone())
    }

    pub fn contains_room(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// All rooms with their member counts, sorted by name
    pub fn rooms(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .iter()
            .map(|entry| RoomInfo {
                name: entry.key().clone(),
                member_count: entry.value().len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of connections currently assigned to any room
    pub fn assigned_count(&self) -> usize {
        self.assignments.len()
    }
}

impl Default for RoomTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Room names: 1-64 characters of alphanumerics, dash, underscore and dot
pub fn is_valid_room_name(name: &str) -> bool {
    if name.is_empty() || name.chars().count() > 64 {
        return false;
    }

    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}
