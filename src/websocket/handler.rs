//! WebSocket Handler
//!
//! Upgrades `/ws` requests and pumps frames between the socket and the hub.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::hub::ConnectionHub;
use super::messages::{ClientMessage, ServerMessage};
use crate::api::AppState;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize message");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let connection_id = match hub.register(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected WebSocket connection");
            if let Some(frame) = encode(&ServerMessage::Error {
                message: e.to_string(),
            }) {
                let _ = sender.send(frame).await;
            }
            return;
        }
    };

    let connected = ServerMessage::Connected {
        connection_id: connection_id.clone(),
    };
    let sent = match encode(&connected) {
        Some(frame) => sender.send(frame).await.is_ok(),
        None => false,
    };
    if !sent {
        hub.unregister(&connection_id).await;
        return;
    }

    let conn_id_for_send = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Some(frame) = encode(&msg) else { continue };
            if sender.send(frame).await.is_err() {
                tracing::debug!(connection_id = %conn_id_for_send, "WebSocket send failed, closing connection");
                break;
            }
        }
    });

    let hub_for_recv = Arc::clone(&hub);
    let conn_id_for_recv = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_ws_message(&hub_for_recv, &conn_id_for_recv, msg).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(connection_id = %conn_id_for_recv, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(&connection_id).await;
}

/// Returns false when the connection should close
async fn handle_ws_message(hub: &Arc<ConnectionHub>, connection_id: &str, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_client_message(hub, connection_id, client_msg).await,
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Invalid client message");
                    let _ = hub
                        .send_to(
                            connection_id,
                            ServerMessage::Error {
                                message: format!("Invalid message format: {}", e),
                            },
                        )
                        .await;
                }
            }
            true
        }
        Message::Binary(_) => {
            let _ = hub
                .send_to(
                    connection_id,
                    ServerMessage::Error {
                        message: "Binary messages not supported".to_string(),
                    },
                )
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Client requested close");
            false
        }
    }
}

async fn handle_client_message(hub: &Arc<ConnectionHub>, connection_id: &str, message: ClientMessage) {
    let response = match message {
        ClientMessage::Subscribe { topics } => hub
            .subscribe(connection_id, topics)
            .await
            .map(|topics| ServerMessage::Subscribed { topics }),
        ClientMessage::Unsubscribe { topics } => hub
            .unsubscribe(connection_id, topics)
            .await
            .map(|topics| ServerMessage::Unsubscribed { topics }),
        ClientMessage::Ping => Ok(ServerMessage::Pong),
    };

    let response = response.unwrap_or_else(|e| {
        tracing::warn!(connection_id = %connection_id, error = %e, "Client message failed");
        ServerMessage::Error {
            message: e.to_string(),
        }
    });
    let _ = hub.send_to(connection_id, response).await;
}
