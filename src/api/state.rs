//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use super::auth::RequestSigner;
use crate::config::ServerConfig;
use crate::manager::Manager;
use crate::store::MemoryStore;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Subscription manager behind the WebSocket and side channel
    pub manager: Arc<Manager>,
    /// Document store written through the document routes
    pub store: Arc<MemoryStore>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Side-channel verifier; `None` disables the side channel
    pub signer: Option<RequestSigner>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(manager: Arc<Manager>, store: Arc<MemoryStore>, config: ServerConfig) -> Self {
        Self {
            manager,
            store,
            config: Arc::new(config),
            signer: None,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Enable the side channel with a shared secret
    pub fn with_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.signer = Some(RequestSigner::new(secret));
        self
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
