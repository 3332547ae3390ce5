use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Business event kinds the dispatcher knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NouveauDossier,
    ChangementStatut,
    FichierAjoute,
    DossierUrgent,
    EcheanceProche,
}

impl NotificationKind {
    /// Wire tag, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NouveauDossier => "nouveau_dossier",
            NotificationKind::ChangementStatut => "changement_statut",
            NotificationKind::FichierAjoute => "fichier_ajoute",
            NotificationKind::DossierUrgent => "dossier_urgent",
            NotificationKind::EcheanceProche => "echeance_proche",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable notification value pushed to clients.
///
/// Holds no identity in the service after delivery; the id only exists so
/// clients can mark it read idempotently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub urgent: bool,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            message: message.into(),
            payload,
            timestamp: Utc::now(),
            urgent: false,
        }
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    /// Whether the notification is older than `ttl_seconds`.
    pub fn is_expired(&self, ttl_seconds: u64) -> bool {
        let expiry = self.timestamp + chrono::Duration::seconds(ttl_seconds as i64);
        Utc::now() > expiry
    }
}
