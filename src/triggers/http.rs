//! REST trigger endpoints.
//!
//! The order-management application calls these after its own CRUD work to
//! fan the event out to connected dashboards.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Dossier;
use crate::error::{AppError, Result};
use crate::server::AppState;

/// A new dossier was created
#[derive(Debug, Deserialize)]
pub struct DossierCreatedRequest {
    pub dossier: Dossier,
    /// Identity of the preparer who created the order
    pub created_by: String,
}

/// A dossier changed status
#[derive(Debug, Deserialize)]
pub struct StatusChangedRequest {
    pub dossier: Dossier,
    pub old_status: String,
    pub new_status: String,
    pub changed_by: String,
    pub comment: Option<String>,
}

/// A file was uploaded to a dossier
#[derive(Debug, Deserialize)]
pub struct FileUploadedRequest {
    pub dossier: Dossier,
    pub uploaded_by: String,
    pub file_name: Option<String>,
}

/// A dossier was flagged urgent
#[derive(Debug, Deserialize)]
pub struct DossierUrgentRequest {
    pub dossier: Dossier,
}

/// Deadlines are approaching for a batch of dossiers
#[derive(Debug, Deserialize)]
pub struct DeadlinesRequest {
    pub dossiers: Vec<Dossier>,
}

/// Response for single-notification triggers
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    /// Whether the notification reached at least one connection
    pub success: bool,
    /// Notification ID
    pub notification_id: Uuid,
    /// Number of connections the notification was delivered to
    pub delivered_to: usize,
    /// Number of failed deliveries
    pub failed: usize,
    /// Number of offline recipients the notification was parked for
    pub queued: usize,
    /// Timestamp of the operation
    pub timestamp: DateTime<Utc>,
}

/// Response for the deadline batch trigger
#[derive(Debug, Serialize)]
pub struct DeadlinesResponse {
    pub success: bool,
    /// Number of dossiers a notification was dispatched for
    pub notified: usize,
    pub delivered_to: usize,
    pub failed: usize,
    pub timestamp: DateTime<Utc>,
}

impl From<crate::notification::DeliveryResult> for TriggerResponse {
    fn from(result: crate::notification::DeliveryResult) -> Self {
        Self {
            success: result.success,
            notification_id: result.notification_id,
            delivered_to: result.delivered_to,
            failed: result.failed,
            queued: result.queued,
            timestamp: Utc::now(),
        }
    }
}

/// Notify about a new dossier
pub async fn dossier_created(
    State(state): State<AppState>,
    Json(request): Json<DossierCreatedRequest>,
) -> Result<Json<TriggerResponse>> {
    let result = state
        .dispatcher
        .notify_nouveau_dossier(&request.dossier, &request.created_by)
        .await;

    Ok(Json(result.into()))
}

/// Notify about a status change
pub async fn dossier_status_changed(
    State(state): State<AppState>,
    Json(request): Json<StatusChangedRequest>,
) -> Result<Json<TriggerResponse>> {
    let result = state
        .dispatcher
        .notify_changement_statut(
            &request.dossier,
            &request.old_status,
            &request.new_status,
            &request.changed_by,
            request.comment.as_deref(),
        )
        .await;

    Ok(Json(result.into()))
}

/// Notify about an uploaded file
pub async fn dossier_file_uploaded(
    State(state): State<AppState>,
    Json(request): Json<FileUploadedRequest>,
) -> Result<Json<TriggerResponse>> {
    let result = state
        .dispatcher
        .notify_fichier_ajoute(
            &request.dossier,
            &request.uploaded_by,
            request.file_name.as_deref(),
        )
        .await;

    Ok(Json(result.into()))
}

/// Broadcast an urgent dossier to everyone
pub async fn dossier_urgent(
    State(state): State<AppState>,
    Json(request): Json<DossierUrgentRequest>,
) -> Result<Json<TriggerResponse>> {
    let result = state.dispatcher.notify_dossier_urgent(&request.dossier).await;

    Ok(Json(result.into()))
}

/// Notify about approaching deadlines for a batch of dossiers
pub async fn dossier_deadlines(
    State(state): State<AppState>,
    Json(request): Json<DeadlinesRequest>,
) -> Result<Json<DeadlinesResponse>> {
    if request.dossiers.is_empty() {
        return Err(AppError::Validation("dossiers must not be empty".to_string()));
    }

    let results = state
        .dispatcher
        .notify_echeances_proches(&request.dossiers)
        .await;

    let delivered_to = results.iter().map(|r| r.delivered_to).sum();
    let failed = results.iter().map(|r| r.failed).sum();

    Ok(Json(DeadlinesResponse {
        success: results.iter().any(|r| r.success),
        notified: results.len(),
        delivered_to,
        failed,
        timestamp: Utc::now(),
    }))
}
