//! docfeed HTTP API
//!
//! HTTP and WebSocket surface, built with Axum. `<path>` is the configured
//! mount point (`/mydb` by default).
//!
//! # Endpoints
//!
//! ## Live feed
//! - `GET <path>` - WebSocket connection (`?sid=<connectionId>&route=<route>`)
//! - `POST <path>/subscribe` - Signed side-channel subscribe
//!
//! ## Documents
//! - `POST /docs/:collection` - Insert a document
//! - `GET /docs/:collection/:id` - Fetch a document
//! - `POST /docs/:collection/:id` - Apply update operators
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use docfeed::api::{serve, AppState};
//! use docfeed::broker::MemoryBroker;
//! use docfeed::config::ServerConfig;
//! use docfeed::manager::{Manager, ManagerConfig};
//! use docfeed::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (broker, deliveries) = MemoryBroker::new();
//!     let broker = Arc::new(broker);
//!     let store = Arc::new(MemoryStore::new(broker.clone(), "op:"));
//!     let manager = Manager::new(store.clone(), broker, ManagerConfig::default());
//!     manager.start(deliveries);
//!
//!     let config = ServerConfig::default();
//!     let state = AppState::new(manager, store, config.clone()).with_secret("s3cret");
//!     serve(state, &config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use auth::{RequestSigner, SIGNATURE_HEADER};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::websocket::websocket_handler;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let path = state.config.path.trim_end_matches('/').to_string();
    let path = if path.is_empty() { "/mydb".to_string() } else { path };

    let feed_routes = Router::new()
        .route(&path, get(websocket_handler))
        .route(&format!("{}/subscribe", path), post(routes::subscribe::side_channel_subscribe));

    let document_routes = Router::new()
        .route("/:collection", post(routes::documents::insert_document))
        .route(
            "/:collection/:id",
            get(routes::documents::get_document).post(routes::documents::update_document),
        );

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config);
    let shared_state = Arc::new(state);

    Router::new()
        .merge(feed_routes)
        .nest("/docs", document_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::permissive().allow_origin(AllowOrigin::list(origins))
}

/// Start the API server
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("docfeed listening on {} (feed at {})", addr, config.path);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("docfeed shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
