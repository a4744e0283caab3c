//! Type definitions

mod cache;
mod credential;

pub use cache::{CacheRecord, Partition};
pub use credential::{AuthEvent, AuthState, Credential, TokenChange};

// Re-export REST boundary types used in the public API
pub use casedesk_api::{ApiRequest, ApiResponse, HttpMethod, LoginRequest, TokenGrant};
