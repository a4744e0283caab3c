//! Core configuration structs.
//!
//! Durations are plain integer fields so the structs read naturally from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Credential manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Refresh this long before expiry. Default: 300 (5 minutes)
    pub refresh_threshold_secs: u64,
    /// Total refresh attempts before the session is dropped. Default: 3
    pub max_refresh_attempts: u32,
    /// First backoff delay between refresh attempts. Default: 1000
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling. Default: 30000
    pub retry_max_delay_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: 300,
            max_refresh_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    /// Delay before retry number `attempt` (0-based): base, 2×base, 4×base, ... capped.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let capped_attempt = attempt.min(20);
        let delay_ms = self
            .retry_base_delay_ms
            .saturating_mul(1_u64 << capped_attempt);
        Duration::from_millis(delay_ms.min(self.retry_max_delay_ms))
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_refresh_attempts == 0 {
            return Err(CoreError::ConfigError(
                "auth.max_refresh_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(CoreError::ConfigError(
                "auth.retry_base_delay_ms must not exceed auth.retry_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tiered object cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Freshness window used when a call passes no TTL. Default: 3600 (1 hour)
    pub default_ttl_secs: u64,
    /// Entry ceiling of the execution-data partition. Default: 100000
    pub execution_capacity: u64,
    /// Entry ceiling of the reference-data partition. Default: unbounded
    pub reference_capacity: Option<u64>,
    /// Gzip payloads before persisting. Default: true
    pub compression: bool,
    /// Gzip level 0-9. Default: 6
    pub compression_level: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3_600,
            execution_capacity: 100_000,
            reference_capacity: None,
            compression: true,
            compression_level: 6,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.execution_capacity == 0 || self.reference_capacity == Some(0) {
            return Err(CoreError::ConfigError(
                "cache capacities must be at least 1".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(CoreError::ConfigError(format!(
                "cache.compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.refresh_threshold(), Duration::from_secs(300));
        assert_eq!(config.max_refresh_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = AuthConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(4), Duration::from_secs(16));
        assert_eq!(config.backoff_delay(5), Duration::from_secs(30));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = AuthConfig {
            max_refresh_attempts: 0,
            ..AuthConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::ConfigError(_))));
    }

    #[test]
    fn cache_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl(), Duration::from_secs(3600));
        assert_eq!(config.execution_capacity, 100_000);
        assert!(config.reference_capacity.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cache_rejects_bad_level() {
        let config = CacheConfig {
            compression_level: 12,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
