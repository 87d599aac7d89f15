//! WebSocket Packet Types
//!
//! Every frame is a JSON object whose `e` field names the packet kind.
//!
//! | direction | packet                               |
//! |-----------|--------------------------------------|
//! | in        | `{"e":"subscribe","i":<subId>}`      |
//! | in        | `{"e":"unsubscribe","i":<subId>}`    |
//! | out       | `{"e":"p","i":<subId>,"d":<doc>}`    |
//! | out       | `{"e":"o","i":<subId>,"d":<op>}`     |
//! | out       | `{"e":"u","i":<subId>}`              |
//! | out       | `{"e":"i","i":<connectionId>}`       |

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Packets sent from client to server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    /// Attach a previously exposed subscription
    Subscribe { id: String },
    /// Tear a subscription down
    Unsubscribe { id: String },
}

impl ClientPacket {
    /// Parse an inbound frame.
    ///
    /// Returns `Ok(None)` for objects without a string `e` or with an
    /// unknown kind; those are ignored rather than treated as transport
    /// errors.
    pub fn parse(text: &str) -> Result<Option<Self>, PacketError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(packet) = value else {
            return Err(PacketError::NotAnObject);
        };

        let kind = match packet.get("e") {
            Some(Value::String(kind)) => kind.as_str(),
            _ => return Ok(None),
        };

        let id = || match packet.get("i") {
            Some(Value::String(id)) => Ok(id.clone()),
            _ => Err(PacketError::MissingId(kind.to_string())),
        };

        match kind {
            "subscribe" => Ok(Some(Self::Subscribe { id: id()? })),
            "unsubscribe" => Ok(Some(Self::Unsubscribe { id: id()? })),
            _ => Ok(None),
        }
    }
}

/// Packets sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "e")]
pub enum ServerPacket {
    /// Initial snapshot of a subscription
    #[serde(rename = "p")]
    Payload { i: String, d: Value },

    /// One filtered operation
    #[serde(rename = "o")]
    Op { i: String, d: Value },

    /// Subscription torn down
    #[serde(rename = "u")]
    Unsubscribed { i: String },

    /// Identity assigned to this connection
    #[serde(rename = "i")]
    Identity { i: String },
}

impl ServerPacket {
    pub fn to_text(&self) -> Result<String, PacketError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Malformed inbound frames; any of these closes the connection
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Packet must be a JSON object")]
    NotAnObject,

    #[error("Packet {0} has no subscription id")]
    MissingId(String),

    #[error("Binary frames are not supported")]
    Binary,
}
