//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::notification::NotificationKind;

use super::{
    HEARTBEAT_DURATION_MS, HEARTBEAT_TIMEOUTS, MESSAGES_DELIVERED_TOTAL, MESSAGES_FAILED_TOTAL,
    MESSAGES_SENT_TOTAL, NOTIFICATIONS_TOTAL, QUEUE_DROPPED_TOTAL, QUEUE_ENQUEUED_TOTAL,
    QUEUE_EXPIRED_TOTAL, QUEUE_REPLAYED_TOTAL, QUEUE_SIZE_TOTAL, QUEUE_USERS_TOTAL,
    STALE_CONNECTIONS_EVICTED, WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record a message sent to a role group
    pub fn record_role_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["role"]).inc();
    }

    /// Record a message sent to a user
    pub fn record_user_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["user"]).inc();
    }

    /// Record a broadcast message
    pub fn record_broadcast_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["broadcast"]).inc();
    }

    /// Record a message sent to a room
    pub fn record_room_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["room"]).inc();
    }

    /// Record successful deliveries
    pub fn record_delivered(count: u64) {
        MESSAGES_DELIVERED_TOTAL.inc_by(count);
    }

    /// Record failed deliveries
    pub fn record_failed(count: u64) {
        MESSAGES_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for recording dispatched notifications by kind
pub struct NotificationMetrics;

impl NotificationMetrics {
    pub fn record(kind: NotificationKind) {
        NOTIFICATIONS_TOTAL.with_label_values(&[kind.as_str()]).inc();
    }
}

/// Helper struct for recording client protocol messages
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    pub fn record_authenticate() {
        WS_MESSAGES_RECEIVED.with_label_values(&["authenticate"]).inc();
    }

    pub fn record_heartbeat() {
        WS_MESSAGES_RECEIVED.with_label_values(&["heartbeat"]).inc();
    }

    pub fn record_mark_read() {
        WS_MESSAGES_RECEIVED
            .with_label_values(&["mark_notification_read"])
            .inc();
    }

    pub fn record_join_room() {
        WS_MESSAGES_RECEIVED.with_label_values(&["join_room"]).inc();
    }

    pub fn record_leave_room() {
        WS_MESSAGES_RECEIVED.with_label_values(&["leave_room"]).inc();
    }
}

/// Helper struct for pending-queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn record_enqueued() {
        QUEUE_ENQUEUED_TOTAL.inc();
    }

    pub fn record_replayed(count: usize) {
        QUEUE_REPLAYED_TOTAL.inc_by(count as u64);
    }

    pub fn record_expired(count: usize) {
        QUEUE_EXPIRED_TOTAL.inc_by(count as u64);
    }

    pub fn record_dropped() {
        QUEUE_DROPPED_TOTAL.inc();
    }

    pub fn update_size(total: usize, users: usize) {
        QUEUE_SIZE_TOTAL.set(total as i64);
        QUEUE_USERS_TOTAL.set(users as i64);
    }
}

/// Helper struct for heartbeat task metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(duration_ms: u64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms as f64);
    }

    pub fn record_timeouts(count: u64) {
        HEARTBEAT_TIMEOUTS.inc_by(count);
    }

    pub fn record_evicted(count: u64) {
        STALE_CONNECTIONS_EVICTED.inc_by(count);
    }
}
