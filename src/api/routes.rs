use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};
use crate::triggers::{
    dossier_created, dossier_deadlines, dossier_file_uploaded, dossier_status_changed,
    dossier_urgent,
};

use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Trigger endpoints called by the order-management application
        .nest(
            "/api/v1",
            Router::new()
                .route("/dossiers/created", post(dossier_created))
                .route("/dossiers/status-changed", post(dossier_status_changed))
                .route("/dossiers/file-uploaded", post(dossier_file_uploaded))
                .route("/dossiers/urgent", post(dossier_urgent))
                .route("/dossiers/deadlines", post(dossier_deadlines))
                .route_layer(middleware::from_fn_with_state(state, api_key_auth)),
        )
}
