//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and manages the connection lifecycle.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::messages::{PacketError, ServerPacket};
use super::session::ClientSession;
use crate::api::AppState;
use crate::manager::Manager;

/// Query parameters accepted on the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Connection id chosen by the client
    pub sid: Option<String>,
    /// Route matched against the registered route handlers
    pub route: Option<String>,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let manager = Arc::clone(&state.manager);
    ws.on_upgrade(move |socket| handle_socket(socket, manager, params))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, manager: Arc<Manager>, params: ConnectParams) {
    let (mut sender, mut receiver) = socket.split();

    // Packets for this connection, written by its subscriptions
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerPacket>();

    let session = match manager.connect(params.sid, params.route.as_deref(), tx).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting WebSocket connection");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let connection_id = session.id().to_string();

    let conn_id_for_send = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            match packet.to_text() {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        tracing::debug!(
                            connection_id = %conn_id_for_send,
                            "WebSocket send failed, closing connection"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize packet");
                }
            }
        }
    });

    let manager_for_recv = Arc::clone(&manager);
    let session_for_recv = Arc::clone(&session);
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_ws_message(&manager_for_recv, &session_for_recv, msg) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %session_for_recv.id(),
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
        _ = session.close_requested() => {
            recv_task.abort();
            send_task.abort();
        }
    }

    manager.disconnect(&connection_id);
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
fn handle_ws_message(manager: &Manager, session: &Arc<ClientSession>, message: Message) -> bool {
    let result = match message {
        Message::Text(text) => manager.handle_message(session, &text),
        Message::Binary(_) => Err(PacketError::Binary),
        Message::Ping(_) | Message::Pong(_) => Ok(()),
        Message::Close(_) => {
            tracing::debug!(connection_id = %session.id(), "Client requested close");
            return false;
        }
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::info!(connection_id = %session.id(), error = %e, "Malformed packet, closing connection");
            false
        }
    }
}
