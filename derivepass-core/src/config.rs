//! Client configuration, stored as TOML in the platform config directory.

use crate::platform::{get_default_config_path, get_default_store_path};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_AUTO_LOCK_SECS: u64 = 300;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot write config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Settings for a derivepass client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Record database; the platform default when unset
    pub store_path: Option<PathBuf>,
    /// Lock the vault after this many idle seconds; 0 disables auto-lock
    pub auto_lock_secs: u64,
    pub sync_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            auto_lock_secs: DEFAULT_AUTO_LOCK_SECS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl ClientConfig {
    /// Load from `path`, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&get_default_config_path())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(get_default_store_path)
    }

    pub fn auto_lock(&self) -> Option<Duration> {
        (self.auto_lock_secs > 0).then(|| Duration::from_secs(self.auto_lock_secs))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.auto_lock(), Some(Duration::from_secs(300)));
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_file_and_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "auto_lock_secs = 0\n").unwrap();

        let mut config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.auto_lock(), None);
        assert_eq!(config.sync_interval_secs, DEFAULT_SYNC_INTERVAL_SECS);

        config.store_path = Some(dir.path().join("records.db"));
        config.save(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "auto_lock_secs = \"soon\"").unwrap();
        assert!(matches!(ClientConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
