//! The outbound sync queue.
//!
//! Every change to the queue is announced to WebSocket subscribers so other
//! tabs can update their pending-sync badge.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use flora_engine::SyncQueueItem;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::websocket::ServerMessage;
use crate::AppState;

#[derive(Serialize)]
pub struct QueuedResponse {
    pub id: String,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/sync-queue",
            get(list_queue).post(enqueue).delete(clear_queue),
        )
        .route("/sync-queue/count", get(count))
        .route("/sync-queue/{id}", delete(remove))
}

/// GET /sync-queue - in replay order.
async fn list_queue(State(state): State<AppState>) -> Result<Json<Vec<SyncQueueItem>>> {
    Ok(Json(state.offline.sync_queue.list().await?))
}

/// POST /sync-queue - the body is the action, stored as is.
async fn enqueue(
    State(state): State<AppState>,
    Json(action): Json<Value>,
) -> Result<(StatusCode, Json<QueuedResponse>)> {
    let id = state
        .offline
        .sync_queue
        .enqueue(action)
        .await
        .map_err(AppError::write)?;
    announce(&state).await;
    Ok((StatusCode::CREATED, Json(QueuedResponse { id })))
}

async fn clear_queue(State(state): State<AppState>) -> Result<StatusCode> {
    state
        .offline
        .sync_queue
        .clear()
        .await
        .map_err(AppError::write)?;
    announce(&state).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn count(State(state): State<AppState>) -> Result<Json<CountResponse>> {
    let count = state.offline.sync_queue.count().await?;
    Ok(Json(CountResponse { count }))
}

/// DELETE /sync-queue/{id} - called once the remote side confirmed the action.
async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    state
        .offline
        .sync_queue
        .remove(&id)
        .await
        .map_err(AppError::write)?;
    announce(&state).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Tell subscribers the new queue size. Best effort: the change is already saved.
async fn announce(state: &AppState) {
    if state.conn_manager.connection_count() == 0 {
        return;
    }
    match state.offline.sync_queue.count().await {
        Ok(count) => {
            state
                .conn_manager
                .broadcast_all(ServerMessage::queue_changed(count));
        }
        Err(e) => tracing::warn!(error = %e, "could not count sync queue for subscribers"),
    }
}
