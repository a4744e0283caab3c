//! reqwest-backed [`ApiClient`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;

use crate::config::{ApiConfig, ApiEndpoints};
use crate::error::{ApiError, ApiResult};
use crate::http_client::{send_once, send_with_retry, RetryPolicy};
use crate::traits::ApiClient;
use crate::types::{ApiRequest, ApiResponse, HttpMethod, LoginRequest, TokenGrant};
use crate::utils::log_sanitizer::mask_token;

/// HTTP client for the casedesk REST API.
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    endpoints: ApiEndpoints,
    retry: RetryPolicy,
}

impl HttpApiClient {
    /// Build a client from config.
    ///
    /// # Errors
    /// `ApiError::InvalidUrl` if `base_url` is not an http(s) origin,
    /// `ApiError::NetworkError` if the underlying reqwest client cannot be built.
    pub fn new(config: ApiConfig) -> ApiResult<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ApiError::InvalidUrl {
                detail: format!("base URL must start with http:// or https://: {base_url}"),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::NetworkError {
                detail: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            endpoints: config.endpoints,
            retry: RetryPolicy::with_retries(config.max_retries),
        })
    }

    /// Configured server origin without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.client.post(self.url(path)).json(body)
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn login(&self, request: &LoginRequest) -> ApiResult<TokenGrant> {
        let builder = self.post_json(&self.endpoints.login, request);
        let response = send_with_retry(builder, "POST login", self.retry).await?;

        match response.status {
            _ if response.is_success() => ApiResponse::new(response.status, response.body).json(),
            401 | 403 => {
                log::warn!("[api] Login rejected for user {}", request.username);
                Err(ApiError::InvalidCredentials {
                    raw_message: response.message(),
                })
            }
            status => Err(ApiError::HttpStatus {
                endpoint: "login".to_string(),
                status,
                raw_message: response.message(),
            }),
        }
    }

    async fn refresh(&self, current_token: &str) -> ApiResult<TokenGrant> {
        log::debug!("[api] Refreshing token {}", mask_token(current_token));
        let builder = self
            .client
            .post(self.url(&self.endpoints.refresh))
            .bearer_auth(current_token);

        // No transport retry here: the credential manager owns refresh backoff.
        let response = send_once(builder, "POST refresh").await?;

        if response.is_success() {
            ApiResponse::new(response.status, response.body).json()
        } else {
            Err(ApiError::RefreshRejected {
                status: response.status,
                raw_message: response.message(),
            })
        }
    }

    async fn logout(&self, token: &str) -> ApiResult<()> {
        let builder = self
            .client
            .post(self.url(&self.endpoints.logout))
            .bearer_auth(token);
        let response = send_once(builder, "POST logout").await?;

        if response.is_success() {
            Ok(())
        } else {
            Err(ApiError::HttpStatus {
                endpoint: "logout".to_string(),
                status: response.status,
                raw_message: response.message(),
            })
        }
    }

    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> ApiResult<ApiResponse> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), self.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let action = format!("{} {}", request.method.as_str(), request.path);
        let response = send_with_retry(builder, &action, self.retry).await?;

        Ok(ApiResponse::new(response.status, response.body))
    }
}
