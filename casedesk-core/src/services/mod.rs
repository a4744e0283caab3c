//! Service layer

mod codec;
mod credential_manager;
mod tenant;
mod tiered_cache;

pub use codec::{EncodedPayload, PayloadCodec};
pub use credential_manager::CredentialManager;
pub use tenant::{tenant_from_url, TenantResolver};
pub use tiered_cache::{CacheScope, CacheStats, TieredCache};
