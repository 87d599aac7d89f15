//! Document Routes
//!
//! Minimal write path into the in-memory store so changes can be made
//! while clients watch.
//!
//! - POST /docs/:collection - Insert a document
//! - GET /docs/:collection/:id - Fetch a document
//! - POST /docs/:collection/:id - Apply update operators

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::api::dto::{InsertResponse, UpdateResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::document::{DocumentId, Projection};
use crate::store::DocumentStore;

/// POST /docs/:collection
pub async fn insert_document(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Json(document): Json<Value>,
) -> ApiResult<(StatusCode, Json<InsertResponse>)> {
    let id = state.store.insert(&collection, document).await?;
    Ok((
        StatusCode::CREATED,
        Json(InsertResponse {
            id: id.to_string(),
        }),
    ))
}

/// GET /docs/:collection/:id
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .find_by_id(&collection, &DocumentId::new(id.clone()), &Projection::All)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{}/{}", collection, id)))
}

/// POST /docs/:collection/:id
///
/// Body is an operator object such as `{"$set": {"title": "Woot"}}`.
pub async fn update_document(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    Json(operators): Json<Value>,
) -> ApiResult<Json<UpdateResponse>> {
    state
        .store
        .update_by_id(&collection, &DocumentId::new(id), operators)
        .await?;
    Ok(Json(UpdateResponse {
        status: "ok".to_string(),
    }))
}
