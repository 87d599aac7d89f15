//! Publish/Subscribe Broker
//!
//! The broker carries mutation records from writers to the channel
//! multiplexer. Only the interface lives here plus an in-process
//! implementation; delivery guarantees belong to the broker itself.
//!
//! ## Channels
//!
//! Every document has its own channel, `<prefix><documentId>`. Deliveries
//! for all subscribed channels arrive on a single ordered queue which the
//! [`ChannelMux`](crate::feed::ChannelMux) drains.

mod memory;

pub use memory::{ChannelStats, MemoryBroker};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// A message delivered on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

/// Ordered delivery queue shared by all subscribed channels
pub type Deliveries = mpsc::UnboundedReceiver<BrokerMessage>;

/// Publish/subscribe broker interface
#[async_trait]
pub trait Broker: Send + Sync {
    /// Start receiving messages published on `channel`
    async fn subscribe(&self, channel: &str) -> BrokerResult<()>;

    /// Stop receiving messages published on `channel`
    async fn unsubscribe(&self, channel: &str) -> BrokerResult<()>;

    /// Publish a raw payload on `channel`
    async fn publish(&self, channel: &str, payload: String) -> BrokerResult<()>;
}

/// Errors reported by a broker
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Subscribe to {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("Unsubscribe from {channel} failed: {reason}")]
    Unsubscribe { channel: String, reason: String },

    #[error("Publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    #[error("Broker connection closed")]
    Closed,
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Broker channel carrying the mutations of one document
pub fn channel_name(prefix: &str, document_id: &crate::document::DocumentId) -> String {
    format!("{}{}", prefix, document_id)
}
