mod cli;
mod config;
mod handlers;
mod rooms;
mod storage;
mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    cli::{Cli, Commands},
    config::Config,
    handlers::{
        delete_document, get_document, health_check, list_rooms, save_document, AppState,
        SharedStorage,
    },
    rooms::RoomRegistry,
    storage::DocumentStore,
    websocket::{websocket_handler, RelayState},
};

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Debug client modes
    if let Some(command) = cli.command {
        let result = match command {
            Commands::Tail { url, room } => cli::run_tail(url, room).await,
            Commands::Send { url, room, payload } => cli::run_send(url, room, payload).await,
        };
        if let Err(e) = result {
            error!("Debug client error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // Otherwise, run as server
    let config = Config::from_env();
    info!("Starting Cove relay on port {}", config.port);
    info!("Document store: {}", config.data_dir.display());

    let storage: SharedStorage = Arc::new(DocumentStore::new(&config.data_dir));
    let registry = Arc::new(RoomRegistry::new());

    // Build the Axum router - split into two parts with different states
    let api_routes = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/rooms", get(list_rooms))
        .route("/api/documents/:doc_id/save", post(save_document))
        .route(
            "/api/documents/:doc_id",
            get(get_document).delete(delete_document),
        )
        .with_state(AppState {
            registry: registry.clone(),
            storage,
        });

    let ws_routes = Router::new()
        .route("/api/sync/:room_id", get(websocket_handler))
        .with_state(RelayState {
            registry,
            send_buffer: config.send_buffer,
        });

    let mut app = Router::new()
        .merge(api_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // Serve the UI bundle when one has been built; unmatched routes fall
    // back to index.html for client-side routing.
    if config.dist_dir.exists() {
        info!("Serving UI bundle from {}", config.dist_dir.display());
        let index = config.dist_dir.join("index.html");
        app = app.fallback_service(ServeDir::new(&config.dist_dir).fallback(ServeFile::new(index)));
    }

    // Create the listener
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("Cove listening on {}", addr);

    // Start the server
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
