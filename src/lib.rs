//! # docfeed
//!
//! Live document change notifications over WebSockets.
//!
//! A client connects, subscribes to documents it was told about, and
//! receives an initial snapshot followed by every update that touches the
//! fields it is allowed to see.
//!
//! ## Modules
//!
//! - [`document`]: Document ids, projections and field-level filtering of updates
//! - [`broker`]: Publish/subscribe seam and an in-process broker
//! - [`store`]: Document store seam and an in-memory store that publishes updates
//! - [`feed`]: One broker subscription per document shared by all watchers
//! - [`subscription`]: Subscription lifecycle and the pending registry
//! - [`manager`]: Connection sessions, exposures and routes
//! - [`websocket`]: The client wire protocol
//! - [`api`]: HTTP server, side channel and health endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docfeed::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!
//!     let (broker, deliveries) = MemoryBroker::new();
//!     let broker: Arc<dyn Broker> = Arc::new(broker);
//!     let store = Arc::new(MemoryStore::new(
//!         Arc::clone(&broker),
//!         config.broker.channel_prefix.clone(),
//!     ));
//!
//!     let manager = Manager::new(store.clone(), broker, config.manager_config());
//!     manager.start(deliveries);
//!
//!     // Publish a document and hand its subscription id to a client
//!     let id = store
//!         .insert("posts", serde_json::json!({"title": "Hello"}))
//!         .await?;
//!     let (subscription_id, _) = manager.expose(
//!         Exposure::new(DocumentRef::new("posts", id), Projection::All),
//!         None,
//!     );
//!     println!("subscribe with {}", subscription_id);
//!
//!     serve(AppState::new(manager, store, config.server.clone()), &config.server).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod broker;
pub mod config;
pub mod document;
pub mod feed;
pub mod manager;
pub mod store;
pub mod subscription;
pub mod websocket;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiError, AppState, RequestSigner};

pub use broker::{Broker, BrokerError, BrokerMessage, MemoryBroker};

pub use config::Config;

pub use document::{DocumentId, DocumentRef, Mutation, Projection};

pub use feed::{ChannelMux, FeedError};

pub use manager::{
    ExposureDirectory, Manager, ManagerConfig, ManagerError, ManagerStats, RouteError,
    RouteHandler, RouteRequest,
};

pub use store::{DocumentStore, MemoryStore, StoreError};

pub use subscription::{
    Exposure, PendingRegistry, ReadyState, Subscription, SubscriptionError, SubscriptionEvent,
};

pub use websocket::{ClientPacket, ClientSession, ServerPacket};
