//! Document Subscriptions
//!
//! A subscription follows one document under one projection: it resolves
//! what to watch, joins the document's feed, fetches a projected snapshot,
//! and then streams filtered operations.
//!
//! Events leave a subscription in a fixed order:
//!
//! ```text
//! Payload(snapshot)  Op(buffered)...  Op(live)...  Destroyed
//! ```
//!
//! Any failure is reported as an `Error` event, after which the
//! subscription destroys itself.

mod error;
mod lifecycle;
mod pending;
mod state;

pub use error::SubscriptionError;
pub use lifecycle::Subscription;
pub use pending::PendingRegistry;
pub use state::{OpBuffer, ReadyState};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::document::{DocumentRef, Projection};
use crate::feed::ChannelMux;
use crate::store::DocumentStore;

/// Opaque subscription identifier shared with clients
pub type SubscriptionId = String;

/// Receiving end of a subscription's events
pub type SubscriptionEvents = mpsc::UnboundedReceiver<SubscriptionEvent>;

/// A document exposed to clients under a projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exposure {
    pub document: DocumentRef,
    pub projection: Projection,
}

impl Exposure {
    pub fn new(document: DocumentRef, projection: Projection) -> Self {
        Self { document, projection }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// Projected snapshot; always the first data event
    Payload(Value),
    /// One filtered mutation record
    Op(Value),
    Error(SubscriptionError),
    /// Teardown completed
    Destroyed,
}

/// Resolves a subscription id to the exposure it was created for
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, id: &str) -> Result<Exposure, SubscriptionError>;
}

/// Where a new subscription learns its target from
#[derive(Clone)]
pub enum Source {
    Exposed(Exposure),
    Discover(Arc<dyn Discovery>),
}

/// Shared services every subscription runs against
#[derive(Clone)]
pub struct SubscriptionContext {
    pub mux: Arc<ChannelMux>,
    pub store: Arc<dyn DocumentStore>,
}

impl SubscriptionContext {
    pub fn new(mux: Arc<ChannelMux>, store: Arc<dyn DocumentStore>) -> Self {
        Self { mux, store }
    }
}
