use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::{ApiRequest, ApiResponse, LoginRequest, TokenGrant};

/// casedesk REST API client Trait
///
/// The credential manager only ever talks to the server through this trait,
/// so tests and alternative transports can stand in for [`HttpApiClient`].
///
/// [`HttpApiClient`]: crate::HttpApiClient
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Exchange username/password for a token.
    async fn login(&self, request: &LoginRequest) -> ApiResult<TokenGrant>;

    /// Exchange the current token for a fresh one.
    ///
    /// Any non-success status is reported as
    /// [`ApiError::RefreshRejected`](crate::ApiError::RefreshRejected).
    async fn refresh(&self, current_token: &str) -> ApiResult<TokenGrant>;

    /// Invalidate the token server-side (best effort).
    async fn logout(&self, token: &str) -> ApiResult<()>;

    /// Send a resource request, attaching `bearer` as an `Authorization` header when present.
    ///
    /// Returns the response for every status except the transient ones
    /// (429, 502, 503, 504), which are retried and finally surfaced as errors.
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> ApiResult<ApiResponse>;
}
