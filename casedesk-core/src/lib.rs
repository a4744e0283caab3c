//! casedesk core library
//!
//! Platform-independent client core for the casedesk test-case manager:
//! - Credential Manager: bearer-token lifecycle, background refresh and
//!   authenticated requests with one refresh-and-retry on 401
//! - Tiered Object Cache: widget-local and page-wide memory tiers over a
//!   compressed, LRU-bounded persistent store, scoped per tenant
//!
//! Storage is abstracted behind traits so the application layer can inject
//! in-memory, `SQLite` or keychain adapters.

pub mod config;
pub mod error;
pub mod services;
pub mod traits;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test_utils;

// Re-export common types
pub use config::{AuthConfig, CacheConfig};
pub use error::{CoreError, CoreResult};
pub use services::{CacheScope, CredentialManager, TieredCache};
pub use traits::{CacheStore, Clock, TokenStore};
pub use types::{AuthEvent, AuthState, Credential, Partition};
