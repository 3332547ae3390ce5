//! Pending-notification store for offline recipients.
//!
//! Direct-identity deliveries that find the recipient offline are parked
//! here and replayed as one `pending_notifications` event on the next
//! successful authentication. Role-group and broadcast traffic is never
//! queued; those deliveries are best-effort to currently-connected targets.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::PendingQueueConfig;
use crate::metrics::QueueMetrics;

use super::types::Notification;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pending store is disabled")]
    Disabled,
}

/// One parked notification, tracked per recipient identity.
#[derive(Debug, Clone, Serialize)]
pub struct PendingNotification {
    pub notification: Notification,
    pub queued_at: DateTime<Utc>,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl PendingNotification {
    fn new(notification: Notification) -> Self {
        Self {
            notification,
            queued_at: Utc::now(),
            delivered: false,
            read_at: None,
        }
    }
}

/// Store statistics for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PendingStoreStats {
    pub total_pending: usize,
    pub users_with_pending: usize,
}

#[async_trait]
pub trait PendingStore: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Park a notification for an offline recipient.
    async fn enqueue(&self, user_id: &str, notification: Notification) -> Result<(), StoreError>;

    /// Return undelivered notifications for a recipient and mark them
    /// delivered. Expired entries are discarded on the way out.
    async fn drain(&self, user_id: &str) -> Vec<Notification>;

    /// Mark a notification read. Returns false (a logged no-op, not an
    /// error) when the id is unknown for this recipient.
    async fn mark_read(&self, user_id: &str, notification_id: Uuid) -> bool;

    /// Drop expired entries and entries that have been both delivered and
    /// read. Returns the number removed.
    async fn cleanup(&self) -> usize;

    async fn stats(&self) -> PendingStoreStats;
}

/// In-memory pending store.
///
/// Per-recipient `VecDeque` acting as a bounded FIFO; when full, the oldest
/// entry is dropped. Contents are lost on restart.
pub struct MemoryPendingStore {
    queues: DashMap<String, VecDeque<PendingNotification>>,
    config: PendingQueueConfig,
}

impl MemoryPendingStore {
    pub fn new(config: PendingQueueConfig) -> Self {
        Self {
            queues: DashMap::new(),
            config,
        }
    }

    fn update_gauges(&self) {
        let total: usize = self.queues.iter().map(|entry| entry.value().len()).sum();
        QueueMetrics::update_size(total, self.queues.len());
    }
}

#[async_trait]
impl PendingStore for MemoryPendingStore {
    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn enqueue(&self, user_id: &str, notification: Notification) -> Result<(), StoreError> {
        if !self.config.enabled {
            return Err(StoreError::Disabled);
        }

        let mut queue = self.queues.entry(user_id.to_string()).or_default();

        if queue.len() >= self.config.max_per_user {
            if let Some(dropped) = queue.pop_front() {
                QueueMetrics::record_dropped();
                tracing::debug!(
                    user_id = %user_id,
                    dropped_id = %dropped.notification.id,
                    "Dropped oldest pending notification from full queue"
                );
            }
        }

        tracing::debug!(
            user_id = %user_id,
            notification_id = %notification.id,
            queue_size = queue.len() + 1,
            "Notification parked for offline recipient"
        );

        queue.push_back(PendingNotification::new(notification));
        QueueMetrics::record_enqueued();
        drop(queue);
        self.update_gauges();

        Ok(())
    }

    async fn drain(&self, user_id: &str) -> Vec<Notification> {
        if !self.config.enabled {
            return Vec::new();
        }

        let ttl = self.config.notification_ttl_seconds;
        let mut replayed = Vec::new();
        let mut expired = 0usize;

        if let Some(mut queue) = self.queues.get_mut(user_id) {
            queue.retain_mut(|entry| {
                if entry.notification.is_expired(ttl) {
                    expired += 1;
                    return false;
                }
                if !entry.delivered {
                    entry.delivered = true;
                    replayed.push(entry.notification.clone());
                }
                true
            });

            if queue.is_empty() {
                drop(queue);
                self.queues.remove(user_id);
            }
        }

        if expired > 0 {
            QueueMetrics::record_expired(expired);
        }
        if !replayed.is_empty() {
            QueueMetrics::record_replayed(replayed.len());
            tracing::info!(
                user_id = %user_id,
                replayed = replayed.len(),
                expired = expired,
                "Replayed pending notifications on reconnect"
            );
        }
        self.update_gauges();

        replayed
    }

    async fn mark_read(&self, user_id: &str, notification_id: Uuid) -> bool {
        let Some(mut queue) = self.queues.get_mut(user_id) else {
            return false;
        };

        for entry in queue.iter_mut() {
            if entry.notification.id == notification_id {
                if entry.read_at.is_none() {
                    entry.read_at = Some(Utc::now());
                }
                return true;
            }
        }

        false
    }

    async fn cleanup(&self) -> usize {
        let ttl = self.config.notification_ttl_seconds;
        let mut removed = 0usize;
        let mut expired = 0usize;

        let user_ids: Vec<String> = self.queues.iter().map(|r| r.key().clone()).collect();

        for user_id in user_ids {
            if let Some(mut queue) = self.queues.get_mut(&user_id) {
                let before = queue.len();
                queue.retain(|entry| {
                    if entry.notification.is_expired(ttl) {
                        expired += 1;
                        return false;
                    }
                    !(entry.delivered && entry.read_at.is_some())
                });
                removed += before - queue.len();

                if queue.is_empty() {
                    drop(queue);
                    self.queues.remove(&user_id);
                }
            }
        }

        if expired > 0 {
            QueueMetrics::record_expired(expired);
        }
        if removed > 0 {
            tracing::info!(
                removed = removed,
                remaining_users = self.queues.len(),
                "Cleaned up pending notifications"
            );
        }
        self.update_gauges();

        removed
    }

    async fn stats(&self) -> PendingStoreStats {
        PendingStoreStats {
            total_pending: self.queues.iter().map(|entry| entry.value().len()).sum(),
            users_with_pending: self.queues.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationKind;
    use serde_json::json;

    fn test_store() -> MemoryPendingStore {
        MemoryPendingStore::new(PendingQueueConfig {
            enabled: true,
            max_per_user: 3,
            notification_ttl_seconds: 3600,
        })
    }

    fn test_notification() -> Notification {
        Notification::new(
            NotificationKind::ChangementStatut,
            "Changement de statut",
            "CMD-1",
            json!({}),
        )
    }

    #[tokio::test]
    async fn test_enqueue_and_drain() {
        let store = test_store();
        let notification = test_notification();
        let id = notification.id;

        store.enqueue("u1", notification).await.unwrap();

        let drained = store.drain("u1").await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, id);

        // Already delivered; a second drain replays nothing
        assert!(store.drain("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_other_user_untouched() {
        let store = test_store();
        store.enqueue("u1", test_notification()).await.unwrap();

        assert!(store.drain("u2").await.is_empty());
        assert_eq!(store.drain("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_bounded_queue_drops_oldest() {
        let store = test_store();
        let first = test_notification();
        let first_id = first.id;
        store.enqueue("u1", first).await.unwrap();
        for _ in 0..3 {
            store.enqueue("u1", test_notification()).await.unwrap();
        }

        let drained = store.drain("u1").await;
        assert_eq!(drained.len(), 3);
        assert!(drained.iter().all(|n| n.id != first_id));
    }

    #[tokio::test]
    async fn test_mark_read_and_cleanup() {
        let store = test_store();
        let notification = test_notification();
        let id = notification.id;
        store.enqueue("u1", notification).await.unwrap();

        // Unknown ids are a no-op
        assert!(!store.mark_read("u1", Uuid::new_v4()).await);
        assert!(!store.mark_read("u2", id).await);

        store.drain("u1").await;
        assert!(store.mark_read("u1", id).await);
        // Idempotent within the retention window
        assert!(store.mark_read("u1", id).await);

        let removed = store.cleanup().await;
        assert_eq!(removed, 1);
        assert_eq!(store.stats().await.total_pending, 0);
    }

    #[tokio::test]
    async fn test_disabled_store_rejects_enqueue() {
        let store = MemoryPendingStore::new(PendingQueueConfig {
            enabled: false,
            max_per_user: 3,
            notification_ttl_seconds: 3600,
        });

        assert!(store.enqueue("u1", test_notification()).await.is_err());
        assert!(store.drain("u1").await.is_empty());
    }
}
