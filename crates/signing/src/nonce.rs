//! Replay-protection seam.

use async_trait::async_trait;

/// One-shot nonce records, partitioned by signing key id so a key
/// rotation does not invalidate in-flight requests.
///
/// Implemented by the durable store; tests use an in-memory map.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Whether `(key_id, nonce)` has already been recorded.
    async fn seen(&self, key_id: &str, nonce: &str) -> anyhow::Result<bool>;

    /// Record `(key_id, nonce)` until `expires_at` (epoch seconds).
    /// Returns `false` when the pair already exists — the caller must
    /// treat that as a replay, not an error.
    async fn insert(&self, key_id: &str, nonce: &str, expires_at: i64) -> anyhow::Result<bool>;
}
