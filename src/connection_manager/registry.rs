use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::stats::{ConnectionInfo, ConnectionStats};
use super::types::ConnectionHandle;

/// Set of live WebSocket connections, keyed by connection id.
///
/// Membership is advisory: a member may already be dead and is only
/// discovered when a delivery to it fails.
pub struct ConnectionManager {
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a new connection
    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        let connection_id = handle.id;
        self.connections.insert(connection_id, handle);

        tracing::info!(
            connection_id = %connection_id,
            total_connections = self.connections.len(),
            "Connection registered"
        );
    }

    /// Unregister a connection. Absent ids are ignored; returns whether one was removed.
    pub fn unregister(&self, connection_id: Uuid) -> bool {
        let removed = self.connections.remove(&connection_id).is_some();

        if removed {
            tracing::info!(
                connection_id = %connection_id,
                total_connections = self.connections.len(),
                "Connection unregistered"
            );
        }

        removed
    }

    /// Owned copy of the current members, safe to iterate across awaits
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn contains(&self, connection_id: Uuid) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        let open_connections = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .count();

        ConnectionStats {
            total_connections: self.connections.len(),
            open_connections,
        }
    }

    /// Summaries of every member, oldest first
    pub fn list_connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| {
                let handle = entry.value();
                ConnectionInfo {
                    id: handle.id,
                    peer_addr: handle.peer_addr,
                    connected_at: handle.connected_at,
                    state: handle.state().to_string(),
                }
            })
            .collect();

        infos.sort_by_key(|info| info.connected_at);
        infos
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
