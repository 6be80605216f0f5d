//! Vault configuration: optional TOML file, then environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use chartlock_keystore::KeyManagerOptions;

pub const ENV_CONFIG: &str = "CHARTLOCK_CONFIG";
pub const ENV_KEY_DIR: &str = "CHARTLOCK_KEY_DIR";
pub const ENV_CURRENT_KEY_VERSION: &str = "CHARTLOCK_CURRENT_KEY_VERSION";
pub const ENV_LOG_FORMAT: &str = "CHARTLOCK_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Log output style for the binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Top-level configuration (loaded from chartlock.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding `key-v<N>.json` files
    pub key_directory: PathBuf,
    /// Pin the current key version instead of using the highest stored one
    pub current_key_version: Option<i32>,
    /// Log format: "pretty" or "json"
    pub log_format: LogFormat,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_directory: default_key_directory(),
            current_key_version: None,
            log_format: LogFormat::default(),
        }
    }
}

/// `<local data dir>/chartlock/keys`, or `./chartlock-keys` when no data dir is known.
pub fn default_key_directory() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("chartlock").join("keys"))
        .unwrap_or_else(|| PathBuf::from("chartlock-keys"))
}

impl VaultConfig {
    /// Parse a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file at `path` (or `CHARTLOCK_CONFIG`) if any, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(ENV_CONFIG).map(PathBuf::from);
        let mut config = match path.or(env_path.as_deref()) {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Override fields from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_KEY_DIR).filter(|s| !s.is_empty()) {
            self.key_directory = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_CURRENT_KEY_VERSION).filter(|s| !s.is_empty()) {
            let version = value
                .trim()
                .parse::<i32>()
                .ok()
                .filter(|v| *v >= 1)
                .ok_or(ConfigError::InvalidEnv {
                    var: ENV_CURRENT_KEY_VERSION,
                    value: value.clone(),
                })?;
            self.current_key_version = Some(version);
        }
        if let Some(value) = lookup(ENV_LOG_FORMAT).filter(|s| !s.is_empty()) {
            self.log_format = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_LOG_FORMAT,
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    pub fn key_manager_options(&self) -> KeyManagerOptions {
        KeyManagerOptions {
            pinned_version: self.current_key_version,
        }
    }
}
