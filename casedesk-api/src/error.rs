use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all REST boundary operations.
///
/// Every variant is serializable for structured error reporting to the UI layer.
///
/// # Retryable Errors
///
/// The following variants represent transient failures that may succeed on retry:
/// - [`NetworkError`](Self::NetworkError): connectivity issues and 502/503/504 responses
/// - [`Timeout`](Self::Timeout): request timed out
/// - [`RateLimited`](Self::RateLimited): HTTP 429
///
/// The built-in HTTP client automatically retries these with exponential backoff.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum ApiError {
    /// A network-level error occurred (DNS resolution failure, connection refused, etc.).
    #[error("Network error: {detail}")]
    NetworkError {
        /// Error details.
        detail: String,
    },

    /// The HTTP request timed out.
    #[error("Request timeout: {detail}")]
    Timeout {
        /// Error details.
        detail: String,
    },

    /// The API rate limit has been exceeded (HTTP 429).
    #[error("Rate limited{}", .retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited {
        /// Suggested wait time in seconds before retrying, if provided by the server.
        retry_after: Option<u64>,
        /// Original response body, if available.
        raw_message: Option<String>,
    },

    /// The login endpoint rejected the supplied username/password.
    #[error("Invalid credentials{}", .raw_message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    InvalidCredentials {
        /// Original response body, if available.
        raw_message: Option<String>,
    },

    /// The refresh endpoint answered with a non-success status.
    #[error("Token refresh rejected (HTTP {status})")]
    RefreshRejected {
        /// HTTP status returned by the refresh endpoint.
        status: u16,
        /// Original response body, if available.
        raw_message: Option<String>,
    },

    /// An auth endpoint answered with an unexpected non-success status.
    #[error("{endpoint} failed (HTTP {status})")]
    HttpStatus {
        /// Logical endpoint name (`login`, `logout`, ...).
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Original response body, if available.
        raw_message: Option<String>,
    },

    /// Failed to parse a response body.
    #[error("Parse error: {detail}")]
    ParseError {
        /// Details about the parse failure.
        detail: String,
    },

    /// Failed to serialize a request body.
    #[error("Serialization error: {detail}")]
    SerializationError {
        /// Details about the serialization failure.
        detail: String,
    },

    /// The configured base URL or request path could not be turned into a URL.
    #[error("Invalid URL: {detail}")]
    InvalidUrl {
        /// Details about the malformed URL.
        detail: String,
    },
}

impl ApiError {
    /// Whether the error is expected behavior (bad user input, server said no),
    /// used for log classification.
    ///
    /// Returns `true` when `warn` should be used and `false` for `error`.
    /// **Update this method when adding variants.**
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials { .. }
                | Self::RefreshRejected { .. }
                | Self::HttpStatus { .. }
                | Self::RateLimited { .. }
        )
    }

    /// Whether the failure is transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }
}

/// Convenience type alias for `Result<T, ApiError>`.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
