//! REST client configuration.

use serde::{Deserialize, Serialize};

/// Paths of the auth endpoints, relative to [`ApiConfig::base_url`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEndpoints {
    /// Default: `/api/auth/login`
    pub login: String,
    /// Default: `/api/auth/refresh`
    pub refresh: String,
    /// Default: `/api/auth/logout`
    pub logout: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            login: "/api/auth/login".to_string(),
            refresh: "/api/auth/refresh".to_string(),
            logout: "/api/auth/logout".to_string(),
        }
    }
}

/// Configuration of [`HttpApiClient`](crate::HttpApiClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Server origin, e.g. `https://cases.example.com`. Default: `http://localhost:8080`
    pub base_url: String,
    /// Per-request timeout in seconds. Default: 30
    pub timeout_secs: u64,
    /// Transport-level retries for transient failures on resource requests. Default: 2
    pub max_retries: u32,
    pub endpoints: ApiEndpoints,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            endpoints: ApiEndpoints::default(),
        }
    }
}

impl ApiConfig {
    /// Config with defaults and the given base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ApiConfig =
            serde_json::from_str(r#"{"base_url":"https://cases.example.com","endpoints":{"refresh":"/token/renew"}}"#)
                .unwrap();
        assert_eq!(config.base_url, "https://cases.example.com");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.endpoints.refresh, "/token/renew");
        assert_eq!(config.endpoints.login, "/api/auth/login");
    }
}
