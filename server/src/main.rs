//! Flora Server entry point.

use flora_server::config::Config;
use flora_server::websocket::spawn_event_forwarder;
use flora_server::{build_store, create_app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "flora_server=debug,flora_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        storage = ?config.storage,
        store = %config.store_name,
        "Starting Flora Server on {}:{}",
        config.host,
        config.port
    );

    let offline = build_store(&config);

    // Warm the store so migration problems show up in the startup log. A
    // failure here is not fatal: the next request retries the open.
    if let Err(e) = offline.store().open().await {
        tracing::warn!(error = %e, "offline store not ready at startup");
    }

    let state = AppState::new(offline, config.clone());
    let _forwarder = spawn_event_forwarder(state.offline.store(), state.conn_manager.clone());
    let app = create_app(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
