//! Configuration schema and defaults.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Environment variable holding the signing secret spec (a JSON
/// mapping `{key_id: secret}` or a plain string). Takes precedence
/// over the config file.
pub const SECRETS_ENV_VAR: &str = "STINT_SIGNING_SECRETS";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StintConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub signing: SigningConfig,
    pub webhook: WebhookConfig,
    pub identity: IdentityConfig,
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// sqlx connection URL. `sqlite::memory:` gives a throwaway dev DB.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:stint.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SigningConfig {
    /// Inline secret spec. `${ENV_VAR}` substitution applies, so
    /// `secrets = "${MY_SECRET}"` works without putting key material
    /// in the file.
    pub secrets: Option<String>,
    /// Path to a file holding the secret spec.
    pub secrets_file: Option<String>,
    /// Key id outbound signatures use. Defaults to the greatest key id.
    pub active_key_id: Option<String>,
}

impl SigningConfig {
    /// Resolve the secret spec: environment first, then inline config,
    /// then the secrets file.
    pub fn resolve_spec(&self) -> Result<String> {
        if let Ok(spec) = std::env::var(SECRETS_ENV_VAR)
            && !spec.trim().is_empty()
        {
            return Ok(spec);
        }
        if let Some(ref spec) = self.secrets
            && !spec.trim().is_empty()
        {
            return Ok(spec.clone());
        }
        if let Some(ref path) = self.secrets_file {
            return std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            });
        }
        Err(ConfigError::NoSecrets)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    /// Where signed callbacks go. Unset disables delivery.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// Only `memory` ships in-tree; anything else must be wired up by
    /// the embedding binary.
    pub provider: String,
    /// Directory seed for the memory provider.
    pub users: Vec<SeedUser>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            provider: "memory".into(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SeedUser {
    pub user_id: String,
    pub user_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    pub interval_minutes: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = StintConfig::default();
        assert_eq!(cfg.server.port, 8787);
        assert_eq!(cfg.reconciler.interval_minutes, 15);
        assert_eq!(cfg.identity.provider, "memory");
        assert!(cfg.webhook.url.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let cfg: StintConfig = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0"
            port = 9000

            [database]
            url = "sqlite:/var/lib/stint/stint.db?mode=rwc"

            [signing]
            secrets = '{"k1": "a", "k2": "b"}'
            active_key_id = "k2"

            [webhook]
            url = "https://chat.example.com/jit/callback"

            [identity]
            provider = "memory"
            [[identity.users]]
            user_id = "u-1"
            user_name = "rachel"
            email = "r@example.com"

            [reconciler]
            interval_minutes = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.signing.active_key_id.as_deref(), Some("k2"));
        assert_eq!(cfg.identity.users.len(), 1);
        assert_eq!(cfg.reconciler.interval_minutes, 5);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(toml::from_str::<StintConfig>("[server]\nbindd = \"x\"\n").is_err());
    }

    #[test]
    fn test_resolve_spec_prefers_inline_over_file() {
        let signing = SigningConfig {
            secrets: Some("inline-secret".into()),
            secrets_file: Some("/nonexistent".into()),
            active_key_id: None,
        };
        assert_eq!(signing.resolve_spec().unwrap(), "inline-secret");
    }

    #[test]
    fn test_resolve_spec_empty_is_an_error() {
        let signing = SigningConfig::default();
        assert!(matches!(signing.resolve_spec(), Err(ConfigError::NoSecrets)));
    }
}
