use thiserror::Error;

/// Why a signature failed to validate. All of these surface to the
/// caller as unauthorized; the variant only feeds logs.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("missing required header: {header}")]
    MissingHeader { header: &'static str },

    #[error("timestamp is not decimal epoch seconds: {value}")]
    BadTimestamp { value: String },

    #[error("timestamp outside allowed skew: |now - ts| = {skew_secs}s")]
    SkewExceeded { skew_secs: i64 },

    #[error("nonce already used")]
    ReplayedNonce,

    #[error("signature does not match any configured key")]
    BadSignature,

    #[error("key material rejected by HMAC")]
    InvalidKey,

    #[error("invalid key set: {message}")]
    InvalidKeySet { message: String },

    #[error("nonce store: {message}")]
    NonceStore { message: String },
}

impl SigningError {
    #[must_use]
    pub fn missing_header(header: &'static str) -> Self {
        Self::MissingHeader { header }
    }

    #[must_use]
    pub fn invalid_key_set(message: impl Into<String>) -> Self {
        Self::InvalidKeySet {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn nonce_store(message: impl Into<String>) -> Self {
        Self::NonceStore {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SigningError>;
