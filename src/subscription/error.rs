//! Subscription error types

use thiserror::Error;

use crate::document::DocumentRef;
use crate::feed::FeedError;

/// Errors surfaced by a subscription before it destroys itself
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// No exposure is registered under the subscription id
    #[error("Unknown subscription: {0}")]
    Unknown(String),

    /// The registered exposure could not be decoded
    #[error("Corrupt subscription data for {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// Snapshot fetch found no document
    #[error("Document not found: {0}")]
    NotFound(DocumentRef),

    /// Snapshot fetch failed
    #[error("Store error: {0}")]
    Store(String),

    /// Joining or leaving the channel feed failed
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Torn down before becoming live
    #[error("Subscription destroyed")]
    Destroyed,
}

impl SubscriptionError {
    /// Errors raised while resolving what to subscribe to
    pub fn is_discovery(&self) -> bool {
        matches!(self, Self::Unknown(_) | Self::Corrupt { .. })
    }
}
