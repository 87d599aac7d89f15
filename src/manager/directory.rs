//! Exposure directory
//!
//! Remembers what every exposed subscription id points at so a client can
//! later attach it with a `subscribe` packet. Records are stored in their
//! JSON form `{"c": collection, "i": documentId, "f": fields}`.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::document::{DocumentRef, Projection};
use crate::subscription::{Discovery, Exposure, SubscriptionError, SubscriptionId};

#[derive(Default)]
pub struct ExposureDirectory {
    records: RwLock<HashMap<SubscriptionId, Value>>,
}

impl ExposureDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, exposure: &Exposure) {
        let record = json!({
            "c": exposure.document.collection,
            "i": exposure.document.id.as_str(),
            "f": exposure.projection.to_value(),
        });
        self.insert_raw(id, record);
    }

    /// Store a record exactly as given
    pub fn insert_raw(&self, id: &str, record: Value) {
        self.records.write().insert(id.to_string(), record);
    }

    pub fn remove(&self, id: &str) -> bool {
        self.records.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Decode the record stored under `id`
    pub fn lookup(&self, id: &str) -> Result<Exposure, SubscriptionError> {
        let record = self
            .records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SubscriptionError::Unknown(id.to_string()))?;

        let corrupt = |reason: &str| SubscriptionError::Corrupt {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let collection = record
            .get("c")
            .and_then(Value::as_str)
            .ok_or_else(|| corrupt("missing collection"))?;
        let document_id = record
            .get("i")
            .and_then(Value::as_str)
            .ok_or_else(|| corrupt("missing document id"))?;
        let projection = match record.get("f") {
            Some(fields) => Projection::from_value(fields).map_err(|e| corrupt(&e.to_string()))?,
            None => Projection::All,
        };

        Ok(Exposure::new(DocumentRef::new(collection, document_id), projection))
    }
}

#[async_trait]
impl Discovery for ExposureDirectory {
    async fn discover(&self, id: &str) -> Result<Exposure, SubscriptionError> {
        self.lookup(id)
    }
}
