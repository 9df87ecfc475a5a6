//! Config file discovery and loading.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{ConfigError, Result, env_subst::substitute_env, schema::StintConfig};

const CONFIG_FILENAME: &str = "stint.toml";

/// Load config from an explicit path.
pub fn load_config(path: &Path) -> Result<StintConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw = substitute_env(&raw);
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Discover and load config from standard locations.
///
/// Search order: `./stint.toml`, then `~/.config/stint/stint.toml`.
/// Returns defaults when no file is found or the file fails to load.
pub fn discover_and_load() -> StintConfig {
    match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    StintConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            StintConfig::default()
        },
    }
}

/// First config file found in the standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    let global = config_dir()?.join(CONFIG_FILENAME);
    global.exists().then_some(global)
}

/// The user-global config directory (`~/.config/stint/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "stint").map(|d| d.config_dir().to_path_buf())
}
