//! Unified error type definition

use serde::Serialize;
use thiserror::Error;

// Re-export library error type
pub use casedesk_api::ApiError;

/// Core layer error type
///
/// `Clone` so one failed in-flight operation (a refresh, a de-duplicated
/// fetch) can hand the same error to every waiting caller.
#[derive(Error, Debug, Clone, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum CoreError {
    /// No credential is held
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The server denied authorization and the credential could not be recovered
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Token refresh failed on every attempt
    #[error("Token refresh failed after {attempts} attempts: {last_error}")]
    RefreshExhausted { attempts: u32, last_error: String },

    /// Storage layer error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Compression or decompression error
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A cache fetch callback failed
    #[error("Fetch failed: {0}")]
    FetchError(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// REST boundary error (converting from library)
    #[error("{0}")]
    Api(#[from] ApiError),
}

impl CoreError {
    /// Whether it is expected behavior (user input, session ended, etc.), used for log classification.
    ///
    /// Level `warn` should be used when returning `true` and level `error` when returning `false`.
    /// **Please update this method simultaneously when new variants are added. **
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::NotAuthenticated
            | Self::Unauthorized(_)
            | Self::RefreshExhausted { .. }
            | Self::ValidationError(_) => true,
            Self::Api(e) => e.is_expected(),
            _ => false,
        }
    }

    /// Whether the session is over and the UI should send the user to the login entry point.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated | Self::Unauthorized(_) | Self::RefreshExhausted { .. }
        )
    }
}

/// Core layer Result type alias
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_converts() {
        let err: CoreError = ApiError::NetworkError {
            detail: "reset".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Api(ApiError::NetworkError { .. })));
        assert!(!err.is_expected());
    }

    #[test]
    fn session_errors_require_login() {
        assert!(CoreError::NotAuthenticated.requires_login());
        assert!(CoreError::RefreshExhausted {
            attempts: 3,
            last_error: "HTTP 500".into()
        }
        .requires_login());
        assert!(!CoreError::StorageError("disk full".into()).requires_login());
    }

    #[test]
    fn display_refresh_exhausted() {
        let err = CoreError::RefreshExhausted {
            attempts: 3,
            last_error: "Network error: reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "Token refresh failed after 3 attempts: Network error: reset"
        );
    }

    #[test]
    fn serializes_with_code() {
        let json = serde_json::to_value(CoreError::ValidationError("empty key".into())).unwrap();
        assert_eq!(json["code"], "ValidationError");
        assert_eq!(json["details"], "empty key");
    }
}
