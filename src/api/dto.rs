//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================
// SIDE CHANNEL DTOs
// ============================================

/// Out-of-band subscribe request, signed with the shared secret
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideChannelRequest {
    /// Connection the subscription is delivered to
    pub socket_id: String,
    /// Caller-chosen subscription id; generated when absent
    #[serde(default)]
    pub subscription_id: Option<String>,
    pub collection: String,
    pub document_id: String,
    /// Projection in any accepted shape
    #[serde(default)]
    pub fields: Option<Value>,
}

/// Side-channel subscribe response
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeResponse {
    /// Subscription id to attach with a `subscribe` packet
    pub i: String,
}

// ============================================
// DOCUMENT DTOs
// ============================================

/// Response for an inserted document
#[derive(Debug, Serialize, Deserialize)]
pub struct InsertResponse {
    #[serde(rename = "_id")]
    pub id: String,
}

/// Response for an applied update
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub status: String,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: String,
    /// Application version
    pub version: String,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    pub started_at: DateTime<Utc>,
    /// Open client sessions
    pub sessions: usize,
    /// Documents with a live broker subscription
    pub feeds: usize,
    /// Subscriptions waiting for their connection
    pub pending: usize,
    /// Whether the side channel accepts requests
    pub side_channel: bool,
}
