//! HMAC-signed mutual authentication between the chat plugin and the
//! controller.
//!
//! Both directions sign the same canonical message — timestamp, nonce,
//! uppercased method, path, and the hex SHA-256 of the body, joined by
//! single `\n` separators — with HMAC-SHA256 under a shared key set.
//! Verification tolerates key rotation by trying every configured
//! secret; signing always uses the active key. Replay is blocked by a
//! one-shot nonce recorded through the [`nonce::NonceStore`] seam.

pub mod error;
pub mod keys;
pub mod message;
pub mod nonce;
pub mod sign;
pub mod verify;

pub use {
    error::{Result, SigningError},
    keys::KeySet,
    nonce::NonceStore,
    sign::{SignatureHeaders, Signer},
    verify::{InboundHeaders, Verifier},
};

// ── Header names ─────────────────────────────────────────────────────────────

pub const HEADER_KEY_ID: &str = "x-jit-keyid";
pub const HEADER_TIMESTAMP: &str = "x-jit-timestamp";
pub const HEADER_NONCE: &str = "x-jit-nonce";
pub const HEADER_SIGNATURE: &str = "x-jit-signature";
