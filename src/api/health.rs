use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::RegistrySnapshot;
use crate::notification::{DispatcherStatsSnapshot, PendingStoreStats};
use crate::router::RouterStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: RegistrySnapshot,
    pub router: RouterStatsSnapshot,
    pub notifications: DispatcherStatsSnapshot,
    pub pending_queue: PendingStoreStats,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.registry.snapshot(),
        router: state.router.stats(),
        notifications: state.dispatcher.stats(),
        pending_queue: state.store.stats().await,
    })
}
