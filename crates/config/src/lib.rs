//! Configuration for the stint controller.
//!
//! A single TOML file (`stint.toml`) discovered in the working
//! directory or `~/.config/stint/`, with `${ENV_VAR}` substitution in
//! string values. Everything has a default; a missing file yields a
//! dev-friendly configuration with the in-memory identity provider.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    env_subst::substitute_env,
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        DatabaseConfig, IdentityConfig, ReconcilerConfig, SeedUser, ServerConfig, SigningConfig,
        StintConfig, WebhookConfig,
    },
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("no signing secrets configured: set STINT_SIGNING_SECRETS, signing.secrets, or signing.secrets_file")]
    NoSecrets,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
