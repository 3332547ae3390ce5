use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::connection_manager::ConnectionHandle;
use crate::metrics::{
    WsMessageMetrics, WS_AUTH_FAILURES, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED,
    WS_CONNECTION_DURATION,
};
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

const CHANNEL_BUFFER_SIZE: usize = 32;

/// Client-visible authentication failure message
const AUTH_ERROR_MESSAGE: &str = "Token invalide";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
///
/// The upgrade itself always succeeds; authentication happens after the
/// socket is established, either implicitly (token supplied at transport
/// open) or through an explicit `authenticate` message. A failed attempt
/// leaves the socket open so the client can retry.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = extract_token(&query, &headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    // First try query parameter
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    // Then try Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state, initial_token))]
async fn handle_socket(socket: WebSocket, state: AppState, initial_token: Option<String>) {
    let connection_start = std::time::Instant::now();

    // Channel for pushing messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(CHANNEL_BUFFER_SIZE);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    WS_CONNECTIONS_OPENED.inc();

    // Task for sending messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        state,
        tx,
        handle: None,
    };

    // Implicit path: token supplied at transport open
    if let Some(token) = initial_token {
        session.authenticate(&token).await;
    }

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(msg) => {
                if !session.process_message(msg).await {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Unregister on transport close. The record may already be gone if a
    // newer connection for the same identity replaced it.
    if let Some(handle) = session.handle.take() {
        session.state.registry.unregister(handle.id);
    }
    drop(session);
    send_task.abort();

    WS_CONNECTIONS_CLOSED.inc();
    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(duration_secs = duration, "WebSocket connection closed");
}

/// Per-connection protocol state
struct Session {
    state: AppState,
    tx: mpsc::Sender<OutboundMessage>,
    handle: Option<Arc<ConnectionHandle>>,
}

impl Session {
    async fn send(&self, message: ServerMessage) {
        let _ = self.tx.send(OutboundMessage::Raw(message)).await;
    }

    /// Verify a token and register the connection on success.
    ///
    /// On failure the connection is simply never registered; the client gets
    /// an `auth_error` event and may retry.
    async fn authenticate(&mut self, token: &str) {
        match self.state.jwt_validator.validate(token) {
            Ok(claims) => {
                // A re-authentication replaces this connection's registration
                if let Some(previous) = self.handle.take() {
                    self.state.registry.unregister(previous.id);
                }

                let handle = self.state.registry.register(
                    claims.sub.clone(),
                    claims.role,
                    self.tx.clone(),
                );

                tracing::info!(
                    connection_id = %handle.id,
                    user_id = %claims.sub,
                    role = %claims.role,
                    "WebSocket connection authenticated"
                );

                self.send(ServerMessage::Authenticated {
                    success: true,
                    user_id: claims.sub.clone(),
                    user_role: claims.role,
                })
                .await;

                // Replay notifications parked while the user was offline
                let notifications = self.state.store.drain(&claims.sub).await;
                self.send(ServerMessage::PendingNotifications { notifications })
                    .await;

                self.handle = Some(handle);
            }
            Err(e) => {
                WS_AUTH_FAILURES.inc();
                tracing::warn!(error = %e, "WebSocket authentication failed");
                self.send(ServerMessage::AuthError {
                    error: AUTH_ERROR_MESSAGE.to_string(),
                })
                .await;
            }
        }
    }

    /// Process a received WebSocket message.
    /// Returns false if the connection should be closed.
    async fn process_message(&mut self, msg: Message) -> bool {
        match msg {
            Message::Text(text) => {
                self.touch();

                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to parse client message");
                        self.send(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                            .await;
                        return true;
                    }
                };

                self.handle_client_message(client_msg).await;
                true
            }
            Message::Binary(_) => {
                self.send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
                true
            }
            Message::Ping(_) | Message::Pong(_) => {
                self.touch();
                true
            }
            Message::Close(_) => {
                tracing::debug!("Received close frame");
                false
            }
        }
    }

    async fn handle_client_message(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Authenticate { token } => {
                WsMessageMetrics::record_authenticate();
                self.authenticate(&token).await;
            }
            ClientMessage::Heartbeat => {
                WsMessageMetrics::record_heartbeat();
                if let Some(handle) = &self.handle {
                    self.state.registry.touch(handle.id);
                }
                self.send(ServerMessage::HeartbeatAck).await;
            }
            ClientMessage::MarkNotificationRead { notification_id } => {
                WsMessageMetrics::record_mark_read();
                let Some(handle) = &self.handle else {
                    self.send(not_authenticated()).await;
                    return;
                };

                let marked = self
                    .state
                    .store
                    .mark_read(&handle.user_id, notification_id)
                    .await;
                tracing::debug!(
                    user_id = %handle.user_id,
                    notification_id = %notification_id,
                    marked = marked,
                    "Notification read mark"
                );
            }
            ClientMessage::JoinRoom { room } => {
                WsMessageMetrics::record_join_room();
                let Some(handle) = &self.handle else {
                    self.send(not_authenticated()).await;
                    return;
                };

                if !is_valid_room_name(&room) {
                    tracing::warn!(
                        connection_id = %handle.id,
                        room = %room,
                        "Invalid room name"
                    );
                    self.send(ServerMessage::error(
                        "INVALID_ROOM",
                        format!("Invalid room name: {}", room),
                    ))
                    .await;
                    return;
                }

                self.state.registry.join_room(handle.id, &room).await;
            }
            ClientMessage::LeaveRoom { room } => {
                WsMessageMetrics::record_leave_room();
                if let Some(handle) = &self.handle {
                    self.state.registry.leave_room(handle.id, &room).await;
                }
            }
        }
    }

    fn touch(&self) {
        if let Some(handle) = &self.handle {
            self.state.registry.touch(handle.id);
        }
    }
}

fn not_authenticated() -> ServerMessage {
    ServerMessage::error("NOT_AUTHENTICATED", "Authenticate first")
}

/// Validate room name
fn is_valid_room_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }

    // Only allow alphanumeric, dash, underscore, and dot
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_room_names() {
        assert!(is_valid_room_name("dossiers"));
        assert!(is_valid_room_name("dossier-42"));
        assert!(is_valid_room_name("machine_roland"));
        assert!(is_valid_room_name("v1.commandes"));
    }

    #[test]
    fn test_invalid_room_names() {
        assert!(!is_valid_room_name(""));
        assert!(!is_valid_room_name("room with spaces"));
        assert!(!is_valid_room_name("room/path"));
        assert!(!is_valid_room_name("room@special"));
        // Too long
        assert!(!is_valid_room_name(&"a".repeat(65)));
    }
}
