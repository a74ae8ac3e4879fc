//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections and fans notifications out to all
//! of them.

use std::sync::Arc;

use dashmap::DashMap;
use flora_engine::LocalStore;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Subscriber {
    /// Unique identifier for this connection
    pub id: String,
    /// Label the client gave itself (for logs)
    pub client: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Subscriber>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, client: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        tracing::info!(conn_id = %conn_id, client = %client, "WebSocket connection registered");
        self.connections.insert(
            conn_id.clone(),
            Subscriber {
                id: conn_id.clone(),
                client,
                sender,
            },
        );

        conn_id
    }

    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            tracing::info!(conn_id = %conn_id, client = %conn.client, "WebSocket connection unregistered");
        }
    }

    /// Broadcast a message to all connections.
    ///
    /// Returns the number of connections that received the message.
    pub fn broadcast_all(&self, message: ServerMessage) -> usize {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            if entry.value().sender.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        tracing::debug!(recipients = sent_count, "Broadcast message to connections");
        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Relay every lifecycle signal of `store` to all connected clients.
///
/// The task ends when the store's event channel closes.
pub fn spawn_event_forwarder(store: &LocalStore, manager: Arc<ConnectionManager>) -> JoinHandle<()> {
    let mut events = store.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    manager.broadcast_all(ServerMessage::Store { event });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event forwarder fell behind; signals dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flora_engine::storage::MemoryEngine;
    use flora_engine::{SchemaCatalog, StoreEvent, STORE_NAME};

    #[test]
    fn register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("tab-1".to_string(), tx);
        assert_eq!(manager.connection_count(), 1);

        manager.unregister(&conn_id);
        assert_eq!(manager.connection_count(), 0);
        assert!(!manager.send_to(&conn_id, ServerMessage::Pong));
    }

    #[test]
    fn broadcast_reaches_everyone() {
        let manager = ConnectionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        manager.register("tab-1".to_string(), tx1);
        manager.register("tab-2".to_string(), tx2);

        let sent = manager.broadcast_all(ServerMessage::queue_changed(2));

        assert_eq!(sent, 2);
        assert!(matches!(rx1.try_recv().unwrap(), ServerMessage::QueueChanged { count: 2, .. }));
        assert!(matches!(rx2.try_recv().unwrap(), ServerMessage::QueueChanged { count: 2, .. }));
    }

    #[tokio::test]
    async fn store_events_are_forwarded() {
        let engine = MemoryEngine::new();
        let store = LocalStore::new(engine.clone(), SchemaCatalog::flora());
        let manager = ConnectionManager::new_shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.register("tab-1".to_string(), tx);
        let _forwarder = spawn_event_forwarder(&store, manager.clone());
        store.open().await.unwrap();

        engine.terminate(STORE_NAME, "evicted");

        match rx.recv().await.unwrap() {
            ServerMessage::Store { event } => assert_eq!(
                event,
                StoreEvent::Terminated {
                    reason: "evicted".into()
                }
            ),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
