//! Application configuration loaded from TOML.
//!
//! Every section is optional; missing fields take the documented defaults.
//!
//! ```toml
//! [api]
//! base_url = "https://casedesk.example"
//!
//! [auth]
//! refresh_threshold_secs = 300
//!
//! [cache]
//! execution_capacity = 100000
//!
//! [storage]
//! database_path = "/var/lib/casedesk/client.db"
//! poll_interval_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use casedesk_api::ApiConfig;
use casedesk_core::config::{AuthConfig, CacheConfig};
use casedesk_core::error::{CoreError, CoreResult};

/// Where persistent state lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database file. `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// How often the database is checked for credential writes made by
    /// other instances.
    pub poll_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            poll_interval_ms: 1000,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> CoreResult<Self> {
        let config: AppConfig = toml::from_str(contents)
            .map_err(|e| CoreError::ConfigError(format!("Failed to parse config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let base_url = self.api.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(CoreError::ConfigError(format!(
                "api.base_url must be an http(s) URL, got {base_url:?}"
            )));
        }
        if self.api.timeout_secs == 0 {
            return Err(CoreError::ConfigError(
                "api.timeout_secs must be > 0".to_string(),
            ));
        }
        if self
            .storage
            .database_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(CoreError::ConfigError(
                "storage.database_path must not be empty".to_string(),
            ));
        }
        if self.storage.poll_interval_ms == 0 {
            return Err(CoreError::ConfigError(
                "storage.poll_interval_ms must be > 0".to_string(),
            ));
        }
        self.auth.validate()?;
        self.cache.validate()
    }
}
