// Shared infrastructure
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer (business logic)
pub mod connection_manager;
pub mod domain;
pub mod notification;
pub mod router;

// Application layer
pub mod api;
pub mod server;
pub mod triggers;
pub mod websocket;

// Supporting modules
pub mod tasks;
pub mod telemetry;
