//! Flora Server - local HTTP bridge to the offline ledger store.
//!
//! The UI talks to this process over loopback. Every route is a thin
//! wrapper around one accessor of [`OfflineStore`]; the store itself decides
//! when to open, migrate and recover.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use crate::config::{Config, StorageKind};
use crate::websocket::ConnectionManager;
use axum::Router;
use flora_engine::storage::{MemoryEngine, SqliteEngine, StorageEngine};
use flora_engine::{LocalStore, OfflineStore, SchemaCatalog};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub offline: OfflineStore,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(offline: OfflineStore, config: Config) -> Self {
        Self {
            offline,
            config: Arc::new(config),
            conn_manager: ConnectionManager::new_shared(),
        }
    }
}

/// Build the offline store the configuration asks for. Nothing is opened yet.
pub fn build_store(config: &Config) -> OfflineStore {
    let engine: Arc<dyn StorageEngine> = match config.storage {
        StorageKind::Sqlite => Arc::new(SqliteEngine::new(config.data_dir.clone())),
        StorageKind::Memory => Arc::new(MemoryEngine::new()),
    };
    let store = LocalStore::with_name(engine, SchemaCatalog::flora(), config.store_name.clone());
    OfflineStore::new(store)
}

/// Assemble the router with its middleware.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
