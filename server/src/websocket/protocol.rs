//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded, tagged by `type`, and use snake_case.

use flora_engine::StoreEvent;
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the current sync-queue size.
    QueueCount {
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A lifecycle signal from the offline store.
    Store {
        event: StoreEvent,
    },

    /// The sync queue gained or lost items.
    QueueChanged {
        count: usize,
        /// Request ID when this answers a `queue_count` request
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    /// Create an unsolicited queue notification.
    pub fn queue_changed(count: usize) -> Self {
        ServerMessage::QueueChanged {
            count,
            request_id: None,
        }
    }
}
