//! Engine configuration
//!
//! Loaded from a YAML file. Every field has a default so a partial file, or
//! no file at all, yields a working single-node setup.

use crate::punishment::{PunishmentError, PunishmentResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_FILE: &str = "config/punishments.yaml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the durable store
    pub data_dir: PathBuf,
    /// Directory for rolling log files
    pub log_dir: PathBuf,
    /// YAML file listing indefinitely banned identities, addresses and names
    pub indefinite_bans_file: PathBuf,
    pub shared_cache: SharedCacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            indefinite_bans_file: PathBuf::from("config/indefbans.yaml"),
            shared_cache: SharedCacheConfig::default(),
        }
    }
}

/// Shared cache connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedCacheConfig {
    /// Mirror punishments and indefinite bans into the shared cache
    pub enabled: bool,
    /// Connection URL, e.g. `redis://:password@host:6379/0`
    pub url: String,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// If the file doesn't exist, the default configuration is returned.
    ///
    /// # Errors
    /// Returns a configuration error if the file exists but cannot be read or parsed
    pub async fn load(path: impl AsRef<Path>) -> PunishmentResult<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(text) => serde_yaml::from_str(&text)
                .map_err(|e| PunishmentError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(PunishmentError::Config(format!("{}: {e}", path.display()))),
        }
    }

    /// Save configuration to a YAML file, creating its directory if needed
    ///
    /// # Errors
    /// Returns a configuration error if the directory or file cannot be written
    pub async fn save(&self, path: impl AsRef<Path>) -> PunishmentResult<()> {
        let path = path.as_ref();
        let config_error = |e: &dyn std::fmt::Display| {
            PunishmentError::Config(format!("{}: {e}", path.display()))
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| config_error(&e))?;
        }
        let yaml = serde_yaml::to_string(self).map_err(|e| config_error(&e))?;
        tokio::fs::write(path, yaml)
            .await
            .map_err(|e| config_error(&e))
    }
}
