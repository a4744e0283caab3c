//! Client factory.

use std::sync::Arc;

use crate::client::HttpApiClient;
use crate::config::ApiConfig;
use crate::error::ApiResult;
use crate::traits::ApiClient;

/// Creates the default [`ApiClient`] for the given config.
///
/// The client is wrapped in `Arc<dyn ApiClient>` for sharing across async tasks
/// and for injection into the credential manager.
///
/// # Examples
///
/// ```rust,no_run
/// use casedesk_api::{create_client, ApiConfig};
///
/// let client = create_client(ApiConfig::with_base_url("https://cases.example.com")).unwrap();
/// ```
pub fn create_client(config: ApiConfig) -> ApiResult<Arc<dyn ApiClient>> {
    Ok(Arc::new(HttpApiClient::new(config)?))
}
