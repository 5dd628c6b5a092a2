use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::types::{ConnectionHandle, ConnectionId};
use crate::websocket::OutboundMessage;

/// Authoritative store of every live connection
pub struct Registry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a new connection under a fresh identifier
    pub fn register(&self, sender: mpsc::Sender<OutboundMessage>) -> Arc<ConnectionHandle> {
        loop {
            let id = ConnectionId::new();
            if let Entry::Vacant(slot) = self.connections.entry(id) {
                let handle = Arc::new(ConnectionHandle::new(id, sender));
                slot.insert(handle.clone());

                tracing::info!(connection_id = %id, "Connection registered");
                return handle;
            }
        }
    }

    /// Remove a connection. Unknown or already removed identifiers are a no-op.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let removed = self.connections.remove(&connection_id).map(|(_, handle)| handle);
        if removed.is_some() {
            tracing::info!(connection_id = %connection_id, "Connection unregistered");
        }
        removed
    }

    pub fn lookup(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Copy of all registered identifiers. No lock is held once this returns.
    pub fn snapshot(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|r| *r.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
