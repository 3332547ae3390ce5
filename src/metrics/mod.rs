//! Prometheus metrics for the notification service.
//!
//! Covers connections, message delivery, the WebSocket protocol, the
//! pending-notification queue, and the heartbeat task.

mod helpers;

pub use helpers::{
    encode_metrics, HeartbeatMetrics, MessageMetrics, NotificationMetrics, QueueMetrics,
    WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "atelier";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total number of active WebSocket connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of active WebSocket connections"
    ).unwrap();

    /// Connections per role group
    pub static ref ROLE_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_role_connections", METRIC_PREFIX),
        "Number of connections per role group",
        &["role"]
    ).unwrap();

    /// Ad-hoc rooms with at least one member
    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Total number of rooms with at least one member"
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Total messages sent by target type
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total messages sent",
        &["target"]
    ).unwrap();

    /// Total messages delivered (connection count)
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages successfully delivered to connections"
    ).unwrap();

    /// Total message delivery failures
    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total message delivery failures"
    ).unwrap();

    /// Notifications dispatched by business event kind
    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_total", METRIC_PREFIX),
        "Total notifications dispatched",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // WebSocket Metrics
    // ============================================================================

    /// WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket messages received from clients
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Total WebSocket messages received from clients",
        &["type"]
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    /// Failed authentication attempts
    pub static ref WS_AUTH_FAILURES: IntCounter = register_int_counter!(
        format!("{}_ws_auth_failures_total", METRIC_PREFIX),
        "Total failed WebSocket authentication attempts"
    ).unwrap();

    // ============================================================================
    // Pending Queue Metrics
    // ============================================================================

    /// Notifications currently parked
    pub static ref QUEUE_SIZE_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_queue_size_total", METRIC_PREFIX),
        "Total notifications currently in the pending queue"
    ).unwrap();

    /// Recipients with parked notifications
    pub static ref QUEUE_USERS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_queue_users_total", METRIC_PREFIX),
        "Number of recipients with pending notifications"
    ).unwrap();

    /// Notifications parked for offline recipients
    pub static ref QUEUE_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_enqueued_total", METRIC_PREFIX),
        "Total notifications parked for offline recipients"
    ).unwrap();

    /// Notifications replayed on reconnect
    pub static ref QUEUE_REPLAYED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_replayed_total", METRIC_PREFIX),
        "Total notifications replayed on reconnect"
    ).unwrap();

    /// Notifications expired from the queue
    pub static ref QUEUE_EXPIRED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_expired_total", METRIC_PREFIX),
        "Total notifications expired from the pending queue"
    ).unwrap();

    /// Notifications dropped due to a full per-recipient queue
    pub static ref QUEUE_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_dropped_total", METRIC_PREFIX),
        "Total notifications dropped due to a full queue"
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat round duration in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    ).unwrap();

    /// Heartbeat timeouts per round
    pub static ref HEARTBEAT_TIMEOUTS: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Total heartbeat send timeouts"
    ).unwrap();

    /// Stale connections evicted
    pub static ref STALE_CONNECTIONS_EVICTED: IntCounter = register_int_counter!(
        format!("{}_stale_connections_evicted_total", METRIC_PREFIX),
        "Total connections evicted for inactivity"
    ).unwrap();
}
