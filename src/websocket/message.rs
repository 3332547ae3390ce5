use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Dossier, UserRole};
use crate::notification::Notification;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate { token: String },
    Heartbeat,
    MarkNotificationRead { notification_id: Uuid },
    JoinRoom { room: String },
    LeaveRoom { room: String },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "authenticated")]
    Authenticated {
        success: bool,
        user_id: String,
        user_role: UserRole,
    },
    #[serde(rename = "auth_error")]
    AuthError { error: String },
    #[serde(rename = "pending_notifications")]
    PendingNotifications { notifications: Vec<Notification> },
    #[serde(rename = "notification")]
    Notification { notification: Notification },
    /// Raw refresh signal broadcast alongside every targeted notification so
    /// open dashboards re-render whatever they currently display.
    #[serde(rename = "dossier_status_changed")]
    DossierStatusChanged {
        dossier: Dossier,
        #[serde(skip_serializing_if = "Option::is_none")]
        old_status: Option<String>,
        new_status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        changed_by: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn notification(notification: Notification) -> Self {
        Self::Notification { notification }
    }
}

/// Outbound message wrapper, either raw or pre-serialized.
///
/// Pre-serialization lets a fan-out to many connections pay the
/// serialization cost once.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Serialized(Arc<String>),
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Serialized(Arc::new(serde_json::to_string(message)?)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Serialized(json) => Ok(json.as_str().to_string()),
        }
    }
}
