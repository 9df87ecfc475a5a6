//! Outbound signing: fresh nonce and timestamp, MAC under the active key.

use std::sync::Arc;

use uuid::Uuid;

use stint_protocol::now_secs;

use crate::{
    error::Result,
    keys::KeySet,
    message::{canonical_message, compute_mac},
};

/// The four headers attached to a signed request.
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    pub key_id: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

/// Signs outbound requests (webhook callbacks) with the active key.
#[derive(Clone)]
pub struct Signer {
    keys: Arc<KeySet>,
}

impl Signer {
    pub fn new(keys: Arc<KeySet>) -> Self {
        Self { keys }
    }

    /// Sign `method path body` as of now.
    pub fn sign(&self, method: &str, path: &str, body: &[u8]) -> Result<SignatureHeaders> {
        self.sign_at(method, path, body, now_secs())
    }

    /// Sign with an explicit timestamp. The nonce is a fresh 128-bit
    /// value in hex (32 chars).
    pub fn sign_at(&self, method: &str, path: &str, body: &[u8], now: i64) -> Result<SignatureHeaders> {
        let (key_id, secret) = self.keys.active();
        let timestamp = now.to_string();
        let nonce = Uuid::new_v4().simple().to_string();
        let message = canonical_message(&timestamp, &nonce, method, path, body);
        let signature = compute_mac(secret, &message)?;
        Ok(SignatureHeaders {
            key_id: key_id.to_string(),
            timestamp,
            nonce,
            signature,
        })
    }
}
