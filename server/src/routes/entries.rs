//! Pending ledger entries.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use flora_engine::{NewPendingEntry, PendingEntry};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/pending-entries",
            get(list_entries).post(add_entry).delete(clear_entries),
        )
        .route(
            "/pending-entries/{id}",
            get(get_entry).patch(update_entry).delete(delete_entry),
        )
}

/// GET /pending-entries - oldest first.
async fn list_entries(State(state): State<AppState>) -> Result<Json<Vec<PendingEntry>>> {
    Ok(Json(state.offline.pending_entries.list().await?))
}

/// POST /pending-entries - store an entry created while offline.
async fn add_entry(
    State(state): State<AppState>,
    Json(entry): Json<NewPendingEntry>,
) -> Result<(StatusCode, Json<PendingEntry>)> {
    let entries = &state.offline.pending_entries;
    let id = entries.add(entry).await.map_err(AppError::write)?;
    let stored = entries
        .get(&id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("entry {id} vanished after save")))?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// DELETE /pending-entries
async fn clear_entries(State(state): State<AppState>) -> Result<StatusCode> {
    state
        .offline
        .pending_entries
        .clear()
        .await
        .map_err(AppError::write)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /pending-entries/{id}
async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PendingEntry>> {
    state
        .offline
        .pending_entries
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("pending entry {id}")))
}

/// PATCH /pending-entries/{id} - merge the given fields.
async fn update_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<PendingEntry>> {
    state
        .offline
        .pending_entries
        .update(&id, patch)
        .await
        .map_err(AppError::write)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("pending entry {id}")))
}

/// DELETE /pending-entries/{id}
async fn delete_entry(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    state
        .offline
        .pending_entries
        .delete(&id)
        .await
        .map_err(AppError::write)?;
    Ok(StatusCode::NO_CONTENT)
}
