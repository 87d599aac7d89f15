//! In-memory document store
//!
//! Holds documents per collection and publishes a mutation record on the
//! document's broker channel after every successful update, mirroring how a
//! persistent store's change signal feeds the broker.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::ops;
use super::DocumentStore;
use crate::broker::{channel_name, Broker};
use crate::document::{project_document, DocumentId, Mutation, Projection};

type Collection = HashMap<DocumentId, Map<String, Value>>;

pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    broker: Arc<dyn Broker>,
    channel_prefix: String,
}

impl MemoryStore {
    pub fn new(broker: Arc<dyn Broker>, channel_prefix: impl Into<String>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            broker,
            channel_prefix: channel_prefix.into(),
        }
    }

    /// Insert a document, assigning an `_id` when it has none
    pub async fn insert(&self, collection: &str, document: Value) -> StoreResult<DocumentId> {
        let Value::Object(mut document) = document else {
            return Err(StoreError::Document("document must be an object".into()));
        };

        let id = match document.get("_id") {
            Some(Value::String(id)) => DocumentId::new(id.clone()),
            Some(other) => DocumentId::new(other.to_string()),
            None => {
                let id = Uuid::new_v4().simple().to_string();
                document.insert("_id".to_string(), Value::String(id.clone()));
                DocumentId::new(id)
            }
        };

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), document);

        tracing::debug!(collection = %collection, document_id = %id, "Document inserted");
        Ok(id)
    }

    /// Apply update operators to the document with the given id
    pub async fn update_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
        operators: Value,
    ) -> StoreResult<()> {
        let query = serde_json::json!({ "_id": id.as_str() });
        self.update(collection, query, operators).await
    }

    /// Apply update operators to the document matched by `query`.
    ///
    /// The query must contain `_id`; further criteria are only used to
    /// resolve positional (`$`) paths. On success the mutation record
    /// `[query, operators]` is published on the document's channel. A
    /// failed publish does not roll the write back: the document keeps the
    /// change and [`StoreError::Broker`] is returned.
    pub async fn update(&self, collection: &str, query: Value, operators: Value) -> StoreResult<()> {
        let mutation = Mutation::from_parts(query, operators)?;
        let id = match mutation.query.get("_id") {
            Some(Value::String(id)) => DocumentId::new(id.clone()),
            Some(other) => DocumentId::new(other.to_string()),
            None => return Err(StoreError::MissingId),
        };

        // Held until published so records leave in write order
        let mut collections = self.collections.write().await;
        let document = collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(&id))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        *document = ops::apply(document, &mutation)?;

        let channel = channel_name(&self.channel_prefix, &id);
        let payload = mutation.to_value().to_string();
        tracing::debug!(document_id = %id, ops = %payload, "Publishing mutation");
        if let Err(e) = self.broker.publish(&channel, payload).await {
            tracing::warn!(document_id = %id, error = %e, "Update applied but not published");
            return Err(e.into());
        }

        Ok(())
    }

    pub async fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
        projection: &Projection,
    ) -> StoreResult<Option<Value>> {
        let collections = self.collections.read().await;
        let snapshot = collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|doc| project_document(&Value::Object(doc.clone()), projection));
        Ok(snapshot)
    }
}
