//! Persistence adapters for the core storage traits.

#[cfg(feature = "keyring-store")]
mod keyring_token_store;

#[cfg(feature = "keyring-store")]
pub use keyring_token_store::KeyringTokenStore;

#[cfg(feature = "sqlite-store")]
mod sqlite;

#[cfg(feature = "sqlite-store")]
pub use sqlite::SqliteStore;
