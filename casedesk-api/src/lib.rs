//! # casedesk-api
//!
//! REST boundary of the casedesk client: the auth endpoints (login, token
//! refresh, logout) and bearer-authenticated resource requests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use casedesk_api::{create_client, ApiConfig, ApiRequest, LoginRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = create_client(ApiConfig::with_base_url("https://cases.example.com"))?;
//!
//!     let grant = client.login(&LoginRequest::new("qa-lead", "secret")).await?;
//!     let response = client
//!         .send(&ApiRequest::get("/api/teams/3/members"), Some(&grant.token))
//!         .await?;
//!     println!("{} {}", response.status, response.body);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`ApiResult<T>`](ApiResult). Transient errors
//! (`NetworkError`, `Timeout`, `RateLimited`) are retried with exponential
//! backoff on login and resource requests. A 401 from a resource endpoint is
//! *not* an error at this layer: it comes back as an [`ApiResponse`] so the
//! credential manager can decide whether to refresh and retry.

mod client;
mod config;
mod error;
mod factory;
mod http_client;
mod traits;
mod types;
mod utils;

pub use client::HttpApiClient;
pub use config::{ApiConfig, ApiEndpoints};
pub use error::{ApiError, ApiResult};
pub use factory::create_client;
pub use traits::ApiClient;
pub use types::{ApiRequest, ApiResponse, HttpMethod, LoginRequest, TokenGrant};
pub use utils::log_sanitizer;
