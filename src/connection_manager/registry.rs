use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::UserRole;
use crate::metrics::{CONNECTIONS_TOTAL, ROLE_CONNECTIONS, ROOMS_ACTIVE};
use crate::websocket::OutboundMessage;

use super::stats::{ConnectionInfo, RegistrySnapshot};
use super::types::ConnectionHandle;

/// Tracks which identities are currently reachable and through which
/// transport.
///
/// Invariant: at most one live record per identity. A new registration for
/// an already-connected identity fully evicts the previous record from every
/// index.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// user_id -> connection_id (single connection per identity)
    user_index: DashMap<String, Uuid>,
    /// role -> Set<connection_id>
    role_index: DashMap<UserRole, HashSet<Uuid>>,
    /// room name -> Set<connection_id> (ad-hoc membership, joined explicitly)
    room_index: DashMap<String, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            role_index: DashMap::new(),
            room_index: DashMap::new(),
        }
    }

    /// Register a connection for an identity, replacing any previous one.
    ///
    /// Always succeeds; the new connection is subscribed to its role group.
    pub fn register(
        &self,
        user_id: String,
        role: UserRole,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Arc<ConnectionHandle> {
        // Replacement is total, not additive: evict the previous record first.
        if let Some(previous) = self.user_index.get(&user_id).map(|entry| *entry.value()) {
            self.unregister(previous);
            tracing::info!(
                user_id = %user_id,
                replaced_connection_id = %previous,
                "Replaced existing connection for identity"
            );
        }

        let handle = Arc::new(ConnectionHandle::new(user_id.clone(), role, sender));
        let conn_id = handle.id;

        self.connections.insert(conn_id, handle.clone());
        self.user_index.insert(user_id, conn_id);
        self.role_index.entry(role).or_default().insert(conn_id);

        CONNECTIONS_TOTAL.set(self.connections.len() as i64);
        ROLE_CONNECTIONS
            .with_label_values(&[role.as_str()])
            .set(self.role_connection_count(role) as i64);

        tracing::info!(
            connection_id = %conn_id,
            user_id = %handle.user_id,
            role = %role,
            "Connection registered"
        );

        handle
    }

    /// Refresh the activity timestamp of the connection owning a transport.
    ///
    /// Heartbeats can legitimately arrive in the race window around a
    /// disconnect, so an unknown id is a no-op rather than an error.
    pub fn touch(&self, connection_id: Uuid) {
        if let Some(handle) = self.connections.get(&connection_id) {
            handle.update_activity();
        }
    }

    /// Unregister a connection. Returns whether a record was found.
    pub fn unregister(&self, connection_id: Uuid) -> bool {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return false;
        };

        // The user index may already point at a replacement connection.
        self.user_index
            .remove_if(&handle.user_id, |_, id| *id == connection_id);

        if let Some(mut role_conns) = self.role_index.get_mut(&handle.role) {
            role_conns.remove(&connection_id);
            if role_conns.is_empty() {
                drop(role_conns);
                self.role_index.remove(&handle.role);
            }
        }

        // Remove from all room memberships
        for mut entry in self.room_index.iter_mut() {
            entry.value_mut().remove(&connection_id);
        }
        self.room_index.retain(|_, conns| !conns.is_empty());

        CONNECTIONS_TOTAL.set(self.connections.len() as i64);
        ROLE_CONNECTIONS
            .with_label_values(&[handle.role.as_str()])
            .set(self.role_connection_count(handle.role) as i64);
        ROOMS_ACTIVE.set(self.room_index.len() as i64);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %handle.user_id,
            "Connection unregistered"
        );

        true
    }

    /// Lookup for direct-to-user delivery
    pub fn get(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        let conn_id = *self.user_index.get(user_id)?.value();
        self.connections.get(&conn_id).map(|h| h.clone())
    }

    /// Join an ad-hoc room (independent of role/identity subscriptions)
    pub async fn join_room(&self, connection_id: Uuid, room: &str) {
        if let Some(handle) = self.connections.get(&connection_id) {
            handle.rooms.write().await.insert(room.to_string());

            self.room_index
                .entry(room.to_string())
                .or_default()
                .insert(connection_id);
            ROOMS_ACTIVE.set(self.room_index.len() as i64);

            tracing::debug!(connection_id = %connection_id, room = %room, "Joined room");
        }
    }

    /// Leave an ad-hoc room
    pub async fn leave_room(&self, connection_id: Uuid, room: &str) {
        if let Some(handle) = self.connections.get(&connection_id) {
            handle.rooms.write().await.remove(room);

            if let Some(mut room_conns) = self.room_index.get_mut(room) {
                room_conns.remove(&connection_id);
                if room_conns.is_empty() {
                    drop(room_conns);
                    self.room_index.remove(room);
                }
            }
            ROOMS_ACTIVE.set(self.room_index.len() as i64);

            tracing::debug!(connection_id = %connection_id, room = %room, "Left room");
        }
    }

    /// Get all connections currently subscribed to a role group
    pub fn get_role_connections(&self, role: UserRole) -> Vec<Arc<ConnectionHandle>> {
        self.role_index
            .get(&role)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get all connections in an ad-hoc room
    pub fn get_room_connections(&self, room: &str) -> Vec<Arc<ConnectionHandle>> {
        self.room_index
            .get(room)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get all connections
    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Get connection by ID
    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Read-only view for diagnostics and the stats endpoint
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut by_role = HashMap::new();
        for entry in self.role_index.iter() {
            by_role.insert(entry.key().as_str().to_string(), entry.value().len());
        }

        let records = self
            .connections
            .iter()
            .map(|entry| {
                let handle = entry.value();
                ConnectionInfo {
                    connection_id: handle.id,
                    user_id: handle.user_id.clone(),
                    role: handle.role,
                    connected_at: handle.connected_at,
                    last_activity: handle.last_activity(),
                }
            })
            .collect();

        RegistrySnapshot {
            total_connections: self.connections.len(),
            by_role,
            records,
        }
    }

    /// Remove every record whose last activity is older than `threshold`.
    ///
    /// The registry owns no timer; the periodic background task drives this.
    pub fn evict_stale(&self, threshold: chrono::Duration) -> usize {
        let now = chrono::Utc::now();
        let stale: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > threshold)
            .map(|entry| *entry.key())
            .collect();

        let count = stale.len();
        for conn_id in stale {
            tracing::info!(connection_id = %conn_id, "Removing stale connection due to timeout");
            self.unregister(conn_id);
        }

        count
    }

    fn role_connection_count(&self, role: UserRole) -> usize {
        self.role_index.get(&role).map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry_with_connection(
        user_id: &str,
        role: UserRole,
    ) -> (ConnectionRegistry, Arc<ConnectionHandle>) {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let handle = registry.register(user_id.to_string(), role, tx);
        (registry, handle)
    }

    #[test]
    fn test_register_and_get() {
        let (registry, handle) = registry_with_connection("u1", UserRole::Preparateur);
        let found = registry.get("u1").expect("connection should be present");
        assert_eq!(found.id, handle.id);
        assert_eq!(found.role, UserRole::Preparateur);
    }

    #[test]
    fn test_register_replaces_previous_record() {
        let (registry, first) = registry_with_connection("u1", UserRole::Preparateur);

        let (tx2, _rx2) = mpsc::channel(8);
        let second = registry.register("u1".to_string(), UserRole::Preparateur, tx2);

        // Lookup by identity is bound to the new transport only.
        let found = registry.get("u1").unwrap();
        assert_eq!(found.id, second.id);
        assert!(registry.get_connection(first.id).is_none());
        assert_eq!(registry.get_role_connections(UserRole::Preparateur).len(), 1);
    }

    #[test]
    fn test_unregister_then_get_absent() {
        let (registry, handle) = registry_with_connection("u1", UserRole::Livreur);

        assert!(registry.unregister(handle.id));
        assert!(registry.get("u1").is_none());
        assert!(registry.get_role_connections(UserRole::Livreur).is_empty());

        // Second unregister is a no-op
        assert!(!registry.unregister(handle.id));
    }

    #[test]
    fn test_touch_unknown_transport_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.touch(Uuid::new_v4());
    }

    #[tokio::test]
    async fn test_room_membership() {
        let (registry, handle) = registry_with_connection("u1", UserRole::Admin);

        registry.join_room(handle.id, "dossier-42").await;
        assert_eq!(registry.get_room_connections("dossier-42").len(), 1);

        registry.leave_room(handle.id, "dossier-42").await;
        assert!(registry.get_room_connections("dossier-42").is_empty());
    }

    #[tokio::test]
    async fn test_unregister_clears_room_membership() {
        let (registry, handle) = registry_with_connection("u1", UserRole::Admin);

        registry.join_room(handle.id, "dossier-42").await;
        registry.unregister(handle.id);
        assert!(registry.get_room_connections("dossier-42").is_empty());
    }

    #[test]
    fn test_evict_stale_uses_last_activity_not_connected_at() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);

        let stale = registry.register("u1".to_string(), UserRole::Preparateur, tx1);
        let fresh = registry.register("u2".to_string(), UserRole::Admin, tx2);

        // Both connected at the same time; only u1 has gone quiet.
        stale.set_last_activity(chrono::Utc::now() - chrono::Duration::hours(2));

        let removed = registry.evict_stale(chrono::Duration::minutes(30));
        assert_eq!(removed, 1);
        assert!(registry.get("u1").is_none());
        assert!(registry.get("u2").is_some());
        assert_eq!(registry.get_connection(fresh.id).unwrap().user_id, "u2");
    }

    #[test]
    fn test_snapshot_counts_by_role() {
        let registry = ConnectionRegistry::new();
        for (user, role) in [
            ("u1", UserRole::Preparateur),
            ("u2", UserRole::Admin),
            ("u3", UserRole::Admin),
        ] {
            let (tx, _rx) = mpsc::channel(8);
            registry.register(user.to_string(), role, tx);
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_connections, 3);
        assert_eq!(snapshot.by_role["admin"], 2);
        assert_eq!(snapshot.by_role["preparateur"], 1);
        assert_eq!(snapshot.records.len(), 3);
    }
}
