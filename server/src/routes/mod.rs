//! HTTP route definitions.

mod caches;
mod entries;
mod events;
mod health;
mod storage;
mod sync_queue;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(entries::routes())
        .merge(caches::routes())
        .merge(sync_queue::routes())
        .merge(storage::routes())
        .merge(events::routes())
}
