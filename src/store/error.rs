//! Document store error types

use thiserror::Error;

use crate::broker::BrokerError;
use crate::document::MutationError;

/// Errors that can occur in the document store
#[derive(Error, Debug)]
pub enum StoreError {
    /// An update operator could not be applied
    #[error("Cannot apply {operator} to {path}: {reason}")]
    InvalidOperation {
        operator: String,
        path: String,
        reason: String,
    },

    /// Operator unknown to the store
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// Updated document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Update query must identify a single document by `_id`
    #[error("Update query must contain _id")]
    MissingId,

    /// Malformed document or update
    #[error("Invalid document: {0}")]
    Document(String),

    #[error("Invalid mutation: {0}")]
    Mutation(#[from] MutationError),

    /// The write was applied but its change could not be published
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
