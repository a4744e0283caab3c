//! Keyring-based token store.
//!
//! Keeps the credential as a JSON blob in the system keychain (macOS
//! Keychain, Windows Credential Manager, Linux Secret Service) via the
//! `keyring` crate. Keychain calls block, so they run on the blocking pool.

use async_trait::async_trait;
use keyring::Entry;

use casedesk_core::error::{CoreError, CoreResult};
use casedesk_core::traits::TokenStore;
use casedesk_core::types::Credential;

const SERVICE_NAME: &str = "casedesk";
const CREDENTIAL_KEY: &str = "session-credential";

/// Keyring-based token store.
#[derive(Debug, Clone, Default)]
pub struct KeyringTokenStore;

impl KeyringTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn entry() -> CoreResult<Entry> {
        Entry::new(SERVICE_NAME, CREDENTIAL_KEY)
            .map_err(|e| CoreError::StorageError(format!("Keychain unavailable: {e}")))
    }

    fn read_sync() -> CoreResult<Option<Credential>> {
        let json = match Self::entry()?.get_password() {
            Ok(json) => json,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(CoreError::StorageError(e.to_string())),
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| CoreError::SerializationError(format!("Invalid credential JSON: {e}")))
    }

    fn write_sync(json: &str) -> CoreResult<()> {
        Self::entry()?
            .set_password(json)
            .map_err(|e| CoreError::StorageError(e.to_string()))
    }

    fn delete_sync() -> CoreResult<()> {
        match Self::entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CoreError::StorageError(e.to_string())),
        }
    }
}

async fn blocking<T, F>(task: F) -> CoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| CoreError::StorageError(format!("Task join error: {e}")))?
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn load(&self) -> CoreResult<Option<Credential>> {
        let credential = blocking(|| {
            log::debug!("Loading credential from Keychain");
            Self::read_sync()
        })
        .await?;
        log::info!(
            "Keychain credential {}",
            if credential.is_some() { "found" } else { "absent" }
        );
        Ok(credential)
    }

    async fn save(&self, credential: &Credential) -> CoreResult<()> {
        let json = serde_json::to_string(credential)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        blocking(move || Self::write_sync(&json)).await?;
        log::info!("Credential saved to Keychain");
        Ok(())
    }

    async fn clear(&self) -> CoreResult<()> {
        blocking(Self::delete_sync).await?;
        log::info!("Credential removed from Keychain");
        Ok(())
    }
}
