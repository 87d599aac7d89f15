//! Side-channel request signing
//!
//! Requests carry `X-MyDB-Signature: hex(HMAC-SHA256(secret, body))`
//! computed over the raw request body.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use super::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request signature
pub const SIGNATURE_HEADER: &str = "x-mydb-signature";

/// Signs and verifies request bodies with the shared secret
#[derive(Clone)]
pub struct RequestSigner {
    secret: Arc<[u8]>,
}

impl RequestSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// Hex signature of `body`
    pub fn sign(&self, body: &[u8]) -> Result<String, ApiError> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a hex signature in constant time
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<(), ApiError> {
        let signature =
            signature.ok_or_else(|| ApiError::Unauthorized("missing signature".to_string()))?;
        let expected = hex::decode(signature.trim())
            .map_err(|_| ApiError::Unauthorized("malformed signature".to_string()))?;

        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| ApiError::Unauthorized("invalid signature".to_string()))
    }

    fn mac(&self) -> Result<HmacSha256, ApiError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ApiError::Internal(format!("HMAC key rejected: {}", e)))
    }
}
