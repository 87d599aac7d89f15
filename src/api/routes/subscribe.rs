//! Side-channel Subscribe Route
//!
//! - POST <path>/subscribe - Create a subscription for a connection that
//!   may not exist yet
//!
//! The body is signed with the shared secret (see [`crate::api::auth`]).
//! The response waits until the subscription is live so the caller can
//! hand the id to its client knowing a payload is on its way.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::auth::SIGNATURE_HEADER;
use crate::api::dto::{SideChannelRequest, SubscribeResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::document::{DocumentRef, Projection};
use crate::subscription::Exposure;

/// POST <path>/subscribe
pub async fn side_channel_subscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<SubscribeResponse>> {
    let signer = state
        .signer
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("side channel is disabled".to_string()))?;

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    signer.verify(&body, signature)?;

    let request: SideChannelRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid request body: {}", e)))?;

    if request.socket_id.is_empty() {
        return Err(ApiError::Validation("socketId must not be empty".to_string()));
    }
    if request.collection.is_empty() || request.document_id.is_empty() {
        return Err(ApiError::Validation(
            "collection and documentId must not be empty".to_string(),
        ));
    }

    let projection = match &request.fields {
        Some(fields) => {
            Projection::from_value(fields).map_err(|e| ApiError::Validation(e.to_string()))?
        }
        None => Projection::All,
    };

    let id = request
        .subscription_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let exposure = Exposure::new(
        DocumentRef::new(request.collection, request.document_id),
        projection,
    );

    let subscription = state
        .manager
        .expose_as(&id, exposure, Some(&request.socket_id))
        .ok_or_else(|| ApiError::Internal("subscription was not started".to_string()))?;

    let timeout = state.manager.subscription_timeout();
    match tokio::time::timeout(timeout, subscription.ready()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            subscription.destroy();
            return Err(ApiError::ServiceUnavailable(format!(
                "subscription {} not live after {:?}",
                id, timeout
            )));
        }
    }

    tracing::info!(
        subscription_id = %id,
        connection_id = %request.socket_id,
        "Side-channel subscription live"
    );

    Ok(Json(SubscribeResponse { i: id }))
}
