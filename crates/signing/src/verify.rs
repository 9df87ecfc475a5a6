//! Inbound signature validation with replay protection.

use std::sync::Arc;

use tracing::debug;

use stint_protocol::SKEW_WINDOW_SECS;

use crate::{
    HEADER_KEY_ID, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP,
    error::{Result, SigningError},
    keys::KeySet,
    message::{canonical_message, compute_mac, constant_time_eq},
    nonce::NonceStore,
};

/// The four signature headers as pulled off the request, `None` where
/// absent. Header-name lookup is the transport's job and is
/// case-insensitive there.
#[derive(Debug, Clone, Copy, Default)]
pub struct InboundHeaders<'a> {
    pub key_id: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub nonce: Option<&'a str>,
    pub signature: Option<&'a str>,
}

/// Validates inbound requests against the full key set.
#[derive(Clone)]
pub struct Verifier {
    keys: Arc<KeySet>,
    nonces: Arc<dyn NonceStore>,
    skew_window_secs: i64,
}

impl Verifier {
    pub fn new(keys: Arc<KeySet>, nonces: Arc<dyn NonceStore>) -> Self {
        Self {
            keys,
            nonces,
            skew_window_secs: SKEW_WINDOW_SECS,
        }
    }

    /// Override the skew window (tests).
    pub fn with_skew_window(mut self, secs: i64) -> Self {
        self.skew_window_secs = secs;
        self
    }

    /// Validate one inbound request. On success the nonce is consumed;
    /// a second validation with the same nonce fails as a replay.
    ///
    /// Every failure maps to unauthorized at the API surface and is
    /// never retried locally.
    pub async fn verify(
        &self,
        headers: InboundHeaders<'_>,
        method: &str,
        path: &str,
        body: &[u8],
        now: i64,
    ) -> Result<String> {
        let key_id = headers
            .key_id
            .ok_or(SigningError::missing_header(HEADER_KEY_ID))?;
        let timestamp = headers
            .timestamp
            .ok_or(SigningError::missing_header(HEADER_TIMESTAMP))?;
        let nonce = headers
            .nonce
            .ok_or(SigningError::missing_header(HEADER_NONCE))?;
        let signature = headers
            .signature
            .ok_or(SigningError::missing_header(HEADER_SIGNATURE))?;

        let ts: i64 = timestamp.parse().map_err(|_| SigningError::BadTimestamp {
            value: timestamp.to_string(),
        })?;
        let skew = (now - ts).abs();
        if skew > self.skew_window_secs {
            return Err(SigningError::SkewExceeded { skew_secs: skew });
        }

        if self
            .nonces
            .seen(key_id, nonce)
            .await
            .map_err(|e| SigningError::nonce_store(e.to_string()))?
        {
            return Err(SigningError::ReplayedNonce);
        }

        let message = canonical_message(timestamp, nonce, method, path, body);
        if !self.mac_matches(key_id, &message, signature)? {
            return Err(SigningError::BadSignature);
        }

        // Consume the nonce only after the MAC checks out, so garbage
        // traffic cannot burn nonces. A lost race on the insert is a
        // concurrent replay of the same capture.
        let inserted = self
            .nonces
            .insert(key_id, nonce, now + 2 * self.skew_window_secs)
            .await
            .map_err(|e| SigningError::nonce_store(e.to_string()))?;
        if !inserted {
            return Err(SigningError::ReplayedNonce);
        }

        Ok(key_id.to_string())
    }

    /// Try the keyed secret first, then every configured secret for
    /// rotation tolerance.
    fn mac_matches(&self, key_id: &str, message: &str, signature: &str) -> Result<bool> {
        if let Some(secret) = self.keys.get(key_id) {
            let expected = compute_mac(secret, message)?;
            if constant_time_eq(&expected, signature) {
                return Ok(true);
            }
        }
        for (other_id, secret) in self.keys.iter() {
            if other_id == key_id {
                continue;
            }
            let expected = compute_mac(secret, message)?;
            if constant_time_eq(&expected, signature) {
                debug!(presented = key_id, matched = other_id, "signature matched non-presented key");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
