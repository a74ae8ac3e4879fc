//! Store-wide operations.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use flora_engine::UsageSummary;

use crate::error::{AppError, Result};
use crate::websocket::ServerMessage;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/storage/usage", get(usage))
        .route("/storage", delete(clear_all))
}

/// GET /storage/usage - record counts per collection.
async fn usage(State(state): State<AppState>) -> Result<Json<UsageSummary>> {
    Ok(Json(state.offline.usage_summary().await?))
}

/// DELETE /storage - wipe every collection (logout).
async fn clear_all(State(state): State<AppState>) -> Result<StatusCode> {
    state.offline.clear_all().await.map_err(AppError::write)?;
    state
        .conn_manager
        .broadcast_all(ServerMessage::queue_changed(0));
    Ok(StatusCode::NO_CONTENT)
}
