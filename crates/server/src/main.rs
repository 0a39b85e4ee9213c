//! chatrelay server
//!
//! Real-time group chat over WebSocket with an AI assistant in the room.
//! Every event is persisted to SQLite before it is broadcast.

mod broadcast;
mod config;
mod dispatch;
mod http;
mod logging;
mod migration_runner;
mod paths;
mod persistence;
mod registry;
mod state;
mod websocket;

use std::sync::Arc;

use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use chatrelay_connectors::OpenAiAssistant;

use crate::config::{resolve_api_key, ServerConfig};
use crate::paths::DataPaths;
use crate::persistence::SqliteStore;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    let paths = DataPaths::resolve(config.data_dir.as_deref())?;
    paths.ensure_dirs()?;
    let logging = logging::init_logging(&paths.log_dir())?;

    info!(
        component = "server",
        event = "server.starting",
        run_id = %logging.run_id,
        data_dir = %paths.root().display(),
        bind = %config.bind,
        "Starting chatrelay server"
    );

    let store = SqliteStore::open(&paths.db_path())?;

    let api_key = resolve_api_key(&paths);
    if api_key.is_none() {
        warn!(
            component = "server",
            event = "server.api_key.missing",
            "No OpenAI API key configured; assistant requests will fail"
        );
    }
    let assistant = OpenAiAssistant::new(config.openai_config(api_key));

    let state = Arc::new(AppState::new(
        Arc::new(store),
        Arc::new(assistant),
        config.context_window,
    ));

    let origin: HeaderValue = config.frontend_origin.parse()?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = http::router(state, cors);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(
        component = "server",
        event = "server.listening",
        bind = %config.bind,
        frontend_origin = %config.frontend_origin,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        component = "server",
        event = "server.stopped",
        "Server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            component = "server",
            event = "server.signal.failed",
            error = %e,
            "Failed to listen for ctrl-c"
        );
        std::future::pending::<()>().await;
    }
    info!(
        component = "server",
        event = "server.shutdown",
        "Shutdown signal received"
    );
}
