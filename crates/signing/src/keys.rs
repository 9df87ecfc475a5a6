//! The signing key set: `key_id → secret` with one active signer key.

use std::collections::BTreeMap;

use secrecy::SecretString;

use crate::error::{Result, SigningError};

/// Key id assumed when the secret spec is a bare string.
pub const DEFAULT_KEY_ID: &str = "default";

/// All currently valid signing keys.
///
/// Verification accepts a MAC under any entry; outbound signing uses
/// the active key. Unless overridden, the active key is the
/// lexicographically greatest key id, so rotation is: add the new
/// (greater) id, roll signers over, then delete the old entry —
/// validation never gaps.
pub struct KeySet {
    keys: BTreeMap<String, SecretString>,
    active_id: String,
    active_secret: SecretString,
}

impl KeySet {
    /// Parse the secret layout: either a JSON object `{key_id: secret}`
    /// or a plain string, which maps to the implicit id `default`.
    pub fn from_spec(spec: &str, active_override: Option<&str>) -> Result<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(SigningError::invalid_key_set("secret spec is empty"));
        }

        let mut keys = BTreeMap::new();
        if trimmed.starts_with('{') {
            let map: BTreeMap<String, String> = serde_json::from_str(trimmed)
                .map_err(|e| SigningError::invalid_key_set(format!("bad JSON mapping: {e}")))?;
            for (key_id, secret) in map {
                if key_id.is_empty() || secret.is_empty() {
                    return Err(SigningError::invalid_key_set("empty key id or secret"));
                }
                keys.insert(key_id, SecretString::new(secret));
            }
        } else {
            keys.insert(DEFAULT_KEY_ID.to_string(), SecretString::new(trimmed.to_string()));
        }

        Self::from_keys(keys, active_override)
    }

    /// Build from an already-parsed mapping.
    pub fn from_keys(
        keys: BTreeMap<String, SecretString>,
        active_override: Option<&str>,
    ) -> Result<Self> {
        if keys.is_empty() {
            return Err(SigningError::invalid_key_set("no keys configured"));
        }
        let active_id = match active_override {
            Some(id) => {
                if !keys.contains_key(id) {
                    return Err(SigningError::invalid_key_set(format!(
                        "active key id {id:?} not present in key set"
                    )));
                }
                id.to_string()
            },
            // BTreeMap iterates in order; the last key id is the greatest.
            None => match keys.keys().next_back() {
                Some(id) => id.clone(),
                None => return Err(SigningError::invalid_key_set("no keys configured")),
            },
        };
        let active_secret = match keys.get(&active_id) {
            Some(secret) => secret.clone(),
            None => return Err(SigningError::invalid_key_set("no keys configured")),
        };
        Ok(Self {
            keys,
            active_id,
            active_secret,
        })
    }

    /// Convenience for a single-key set.
    pub fn single(key_id: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let mut keys = BTreeMap::new();
        keys.insert(key_id.into(), SecretString::new(secret.into()));
        Self::from_keys(keys, None)
    }

    /// The key outbound signatures are made with.
    pub fn active(&self) -> (&str, &SecretString) {
        (self.active_id.as_str(), &self.active_secret)
    }

    pub fn get(&self, key_id: &str) -> Option<&SecretString> {
        self.keys.get(key_id)
    }

    /// Every configured `(key_id, secret)` pair, for rotation-tolerant
    /// verification.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretString)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
