//! Health endpoints
//!
//! - GET /health/live - 200 while the process runs
//! - GET /health - Counters of the live feed

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health
///
/// Reports open sessions, broker feeds and subscriptions still waiting for
/// their connection.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.manager.stats().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        started_at: state.started_at,
        sessions: stats.sessions,
        feeds: stats.feeds,
        pending: stats.pending,
        side_channel: state.signer.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::ServerConfig;
    use crate::manager::{Manager, ManagerConfig};
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_liveness_always_ok() {
        assert_eq!(liveness().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_full_health_counts_sessions() {
        let (broker, deliveries) = MemoryBroker::new();
        let broker = Arc::new(broker);
        let store = Arc::new(MemoryStore::new(broker.clone(), "op:"));
        let manager = Manager::new(store.clone(), broker, ManagerConfig::default());
        manager.start(deliveries);

        let (tx, _rx) = mpsc::unbounded_channel();
        manager.connect(Some("c1".into()), None, tx).await.unwrap();

        let state = Arc::new(AppState::new(manager, store, ServerConfig::default()));
        let Json(health) = full_health(State(state)).await;

        assert_eq!(health.sessions, 1);
        assert_eq!(health.feeds, 0);
        assert_eq!(health.pending, 0);
        assert!(!health.side_channel);
    }
}
