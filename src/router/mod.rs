//! Delivery primitives over the connection registry.
//!
//! All sends are fire-and-forget: no acknowledgement, no retry. A target
//! that disconnects mid-send is silently dropped by the transport layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::connection_manager::{ConnectionHandle, ConnectionRegistry};
use crate::domain::UserRole;
use crate::metrics::MessageMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Threshold for using pre-serialization (saves serialization overhead for larger sends)
const PRESERIALIZATION_THRESHOLD: usize = 4;

/// Outcome of a group delivery
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Delivery {
    /// Number of connections the message was delivered to
    pub delivered: usize,
    /// Number of connections that failed to receive
    pub failed: usize,
}

/// Router send counters
#[derive(Debug, Default)]
pub struct RouterStats {
    pub role_sends: AtomicU64,
    pub user_sends: AtomicU64,
    pub broadcast_sends: AtomicU64,
    pub room_sends: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_failed: AtomicU64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            role_sends: self.role_sends.load(Ordering::Relaxed),
            user_sends: self.user_sends.load(Ordering::Relaxed),
            broadcast_sends: self.broadcast_sends.load(Ordering::Relaxed),
            room_sends: self.room_sends.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, delivery: Delivery) {
        self.total_delivered
            .fetch_add(delivery.delivered as u64, Ordering::Relaxed);
        self.total_failed
            .fetch_add(delivery.failed as u64, Ordering::Relaxed);
    }
}

/// Snapshot of router statistics
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatsSnapshot {
    pub role_sends: u64,
    pub user_sends: u64,
    pub broadcast_sends: u64,
    pub room_sends: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
}

/// Delivers a message to a named group or a single identity.
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    stats: RouterStats,
}

impl Router {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Deliver to every connection currently subscribed to a role group.
    #[tracing::instrument(name = "router.to_role", skip(self, message), fields(role = %role))]
    pub async fn to_role(&self, role: UserRole, message: &ServerMessage) -> Delivery {
        let connections = self.registry.get_role_connections(role);
        let delivery = self.deliver(&connections, message).await;

        self.stats.role_sends.fetch_add(1, Ordering::Relaxed);
        self.stats.record(delivery);
        MessageMetrics::record_role_sent();
        MessageMetrics::record_delivered(delivery.delivered as u64);
        MessageMetrics::record_failed(delivery.failed as u64);

        tracing::debug!(
            role = %role,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Sent message to role group"
        );

        delivery
    }

    /// Deliver to one identity. Returns false, without error, when the
    /// identity has no live connection; nothing is sent in that case.
    #[tracing::instrument(name = "router.to_user", skip(self, message), fields(user_id = %user_id))]
    pub async fn to_user(&self, user_id: &str, message: &ServerMessage) -> bool {
        self.stats.user_sends.fetch_add(1, Ordering::Relaxed);
        MessageMetrics::record_user_sent();

        let Some(handle) = self.registry.get(user_id) else {
            tracing::debug!(user_id = %user_id, "User offline, message not delivered");
            return false;
        };

        match handle.send(message.clone()).await {
            Ok(()) => {
                self.stats.total_delivered.fetch_add(1, Ordering::Relaxed);
                MessageMetrics::record_delivered(1);
            }
            Err(_) => {
                self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
                MessageMetrics::record_failed(1);
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = %handle.id,
                    "Send to user failed, connection may be closing"
                );
            }
        }

        true
    }

    /// Deliver to every currently connected transport regardless of role.
    #[tracing::instrument(name = "router.to_all", skip_all)]
    pub async fn to_all(&self, message: &ServerMessage) -> Delivery {
        let connections = self.registry.get_all_connections();
        let delivery = self.deliver(&connections, message).await;

        self.stats.broadcast_sends.fetch_add(1, Ordering::Relaxed);
        self.stats.record(delivery);
        MessageMetrics::record_broadcast_sent();
        MessageMetrics::record_delivered(delivery.delivered as u64);
        MessageMetrics::record_failed(delivery.failed as u64);

        tracing::debug!(
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Broadcast message to all connections"
        );

        delivery
    }

    /// Deliver to an ad-hoc room.
    #[tracing::instrument(name = "router.to_room", skip(self, message), fields(room = %room))]
    pub async fn to_room(&self, room: &str, message: &ServerMessage) -> Delivery {
        let connections = self.registry.get_room_connections(room);
        let delivery = self.deliver(&connections, message).await;

        self.stats.room_sends.fetch_add(1, Ordering::Relaxed);
        self.stats.record(delivery);
        MessageMetrics::record_room_sent();
        MessageMetrics::record_delivered(delivery.delivered as u64);
        MessageMetrics::record_failed(delivery.failed as u64);

        tracing::debug!(
            room = %room,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Sent message to room"
        );

        delivery
    }

    /// Send a message to a list of connections concurrently.
    ///
    /// Uses bounded parallelism; pre-serializes once above a small fan-out
    /// threshold so the serialization cost is paid once.
    pub async fn deliver(
        &self,
        connections: &[Arc<ConnectionHandle>],
        message: &ServerMessage,
    ) -> Delivery {
        if connections.is_empty() {
            return Delivery::default();
        }

        // Small fan-out: simple sequential sending without pre-serialization
        if connections.len() < PRESERIALIZATION_THRESHOLD {
            let mut delivery = Delivery::default();
            for conn in connections {
                match conn.send(message.clone()).await {
                    Ok(()) => delivery.delivered += 1,
                    Err(_) => delivery.failed += 1,
                }
            }
            return delivery;
        }

        let outbound = match OutboundMessage::preserialized(message) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to pre-serialize message, falling back to per-connection serialization"
                );
                OutboundMessage::Raw(message.clone())
            }
        };

        let mut futures = FuturesUnordered::new();
        let mut delivery = Delivery::default();
        let mut pending = 0;

        for conn in connections {
            let conn = conn.clone();
            let msg = outbound.clone();
            futures.push(async move { conn.send_preserialized(msg).await.is_ok() });
            pending += 1;

            // Drain completed futures once we hit the concurrency limit
            while pending >= MAX_CONCURRENT_SENDS {
                if let Some(ok) = futures.next().await {
                    pending -= 1;
                    if ok {
                        delivery.delivered += 1;
                    } else {
                        delivery.failed += 1;
                    }
                } else {
                    break;
                }
            }
        }

        while let Some(ok) = futures.next().await {
            if ok {
                delivery.delivered += 1;
            } else {
                delivery.failed += 1;
            }
        }

        delivery
    }
}
