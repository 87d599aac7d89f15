//! HTTP errors
//!
//! Every failure leaves the server as `{error: {code, message}, request_id}`.
//! Store and subscription failures keep their cause so the status reflects
//! whether the client or an upstream was at fault.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;
use crate::subscription::SubscriptionError;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or invalid request signature
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Document store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Subscription failed before going live
    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Service unavailable (feature disabled or dependency down)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Binding the listener
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Store(e) => match e {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "DOCUMENT_NOT_FOUND"),
                StoreError::Broker(_) | StoreError::Unavailable(_) => {
                    (StatusCode::BAD_GATEWAY, "STORE_UNAVAILABLE")
                }
                _ => (StatusCode::BAD_REQUEST, "INVALID_UPDATE"),
            },
            ApiError::Subscription(e) => match e {
                SubscriptionError::NotFound(_) => (StatusCode::NOT_FOUND, "DOCUMENT_NOT_FOUND"),
                SubscriptionError::Unknown(_) | SubscriptionError::Corrupt { .. } => {
                    (StatusCode::BAD_REQUEST, "DISCOVERY_ERROR")
                }
                SubscriptionError::Destroyed => (StatusCode::GONE, "SUBSCRIPTION_DESTROYED"),
                SubscriptionError::Store(_) | SubscriptionError::Feed(_) => {
                    (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR")
                }
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let request_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "Request failed"
            );
        } else {
            tracing::warn!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
