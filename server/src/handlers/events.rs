//! WebSocket handler for live store notifications.
//!
//! Each socket is registered with the connection manager, which feeds it
//! store lifecycle signals and queue changes. Clients may also ask for the
//! queue size directly.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use flora_engine::SyncQueue;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Answers incoming messages until the client goes away
/// 4. Cleans up on disconnect
pub async fn handle_event_socket(
    socket: WebSocket,
    queue: SyncQueue,
    conn_manager: Arc<ConnectionManager>,
    client: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = conn_manager.register(client.clone(), tx);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &queue).await;
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        client = %client,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return a server response.
async fn process_message(text: &str, queue: &SyncQueue) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::QueueCount { request_id } => match queue.count().await {
            Ok(count) => ServerMessage::QueueChanged { count, request_id },
            Err(e) => ServerMessage::error(e.to_string(), request_id),
        },
        ClientMessage::Ping => ServerMessage::Pong,
    }
}
