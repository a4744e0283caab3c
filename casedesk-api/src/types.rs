//! Request, response and token types exchanged with the casedesk REST API.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::utils::log_sanitizer::truncate_for_log;

/// HTTP method of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Upper-case method name, used for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request against an authenticated resource endpoint.
///
/// `path` is relative to the client's base URL (e.g. `/api/teams/3/cases`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw response of a resource endpoint.
///
/// Every HTTP status is represented here except the transient ones the
/// transport converts into retryable [`ApiError`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The server denied authorization (HTTP 401).
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            log::error!(
                "[api] JSON parse failed: {e}; raw response: {}",
                truncate_for_log(&self.body)
            );
            ApiError::ParseError {
                detail: e.to_string(),
            }
        })
    }
}

/// Token issued by the login and refresh endpoints.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    #[serde(alias = "access_token", alias = "accessToken")]
    pub token: String,
    /// Lifetime of the token in seconds.
    #[serde(alias = "expiresIn")]
    pub expires_in: u64,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("token", &crate::utils::log_sanitizer::mask_token(&self.token))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Username/password login payload.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders() {
        let req = ApiRequest::get("/api/teams/3/cases")
            .with_query("page", "2")
            .with_query("size", "50");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.query.len(), 2);
        assert!(req.body.is_none());

        let req = ApiRequest::post("/api/cases", serde_json::json!({"title": "login works"}));
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.body.unwrap()["title"], "login works");
    }

    #[test]
    fn response_status_helpers() {
        assert!(ApiResponse::new(204, "").is_success());
        assert!(!ApiResponse::new(401, "").is_success());
        assert!(ApiResponse::new(401, "").is_unauthorized());
        assert!(!ApiResponse::new(403, "").is_unauthorized());
    }

    #[test]
    fn response_json_parse_error() {
        let resp = ApiResponse::new(200, "<html>");
        let parsed: ApiResult<serde_json::Value> = resp.json();
        assert!(matches!(parsed, Err(ApiError::ParseError { .. })));
    }

    #[test]
    fn token_grant_accepts_aliases() {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":3600}"#).unwrap();
        assert_eq!(grant.token, "abc");
        assert_eq!(grant.expires_in, 3600);

        let grant: TokenGrant =
            serde_json::from_str(r#"{"token":"xyz","expiresIn":60}"#).unwrap();
        assert_eq!(grant.token, "xyz");
        assert_eq!(grant.expires_in, 60);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let login = LoginRequest::new("qa-lead", "hunter2");
        assert!(!format!("{login:?}").contains("hunter2"));

        let grant = TokenGrant {
            token: "eyJhbGciOiJIUzI1NiJ9.secret".to_string(),
            expires_in: 10,
        };
        assert!(!format!("{grant:?}").contains("secret"));
    }
}
