//! Document Store
//!
//! The subscription engine only reads snapshots from the store; mutations
//! reach it through the broker. [`MemoryStore`] is the in-process store used
//! by the server binary and the tests.

mod error;
mod memory;
pub mod ops;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{DocumentId, Projection};

/// Read side of a document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a projected, independently owned copy of a document.
    ///
    /// Returns `Ok(None)` when the document does not exist.
    async fn find_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
        projection: &Projection,
    ) -> StoreResult<Option<Value>>;
}
