//! The canonical signing message and MAC primitives.

use {
    hmac::{Hmac, Mac},
    secrecy::{ExposeSecret, SecretString},
    sha2::{Digest, Sha256},
};

use crate::error::{Result, SigningError};

type HmacSha256 = Hmac<Sha256>;

/// Build the canonical message: the five fields joined with a single
/// `\n`, in order — timestamp, nonce, uppercased method, path, and the
/// lowercase hex SHA-256 of the body. Byte-exact on both sides.
pub fn canonical_message(
    timestamp: &str,
    nonce: &str,
    method: &str,
    path: &str,
    body: &[u8],
) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    let method = method.to_ascii_uppercase();
    format!("{timestamp}\n{nonce}\n{method}\n{path}\n{body_hash}")
}

/// HMAC-SHA256 of `message` under `secret`, as lowercase hex.
pub fn compute_mac(secret: &SecretString, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| SigningError::InvalidKey)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
