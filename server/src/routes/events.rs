//! Live notification stream.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::handlers::handle_event_socket;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Label for logs, e.g. a tab id
    #[serde(default)]
    pub client: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/events", get(events_handler))
}

/// GET /events - upgrade to a WebSocket.
async fn events_handler(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let client = query.client.unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| {
        handle_event_socket(
            socket,
            state.offline.sync_queue.clone(),
            state.conn_manager.clone(),
            client,
        )
    })
}
