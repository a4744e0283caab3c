//! Credential persistence abstraction Trait

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::error::CoreResult;
use crate::types::{Credential, TokenChange};

/// Token store Trait
///
/// Holds at most one credential. Platform implementation:
/// - `InMemoryTokenStore` (this crate)
/// - `SqliteStore` (`casedesk-app`, sea-orm)
/// - `KeyringTokenStore` (`casedesk-app`, OS keychain)
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the persisted credential, if any
    async fn load(&self) -> CoreResult<Option<Credential>>;

    /// Replace the persisted credential
    async fn save(&self, credential: &Credential) -> CoreResult<()>;

    /// Remove the persisted credential
    async fn clear(&self) -> CoreResult<()>;

    /// Change notifications from other holders of the same store.
    ///
    /// Stores that cannot observe foreign writes return `None`.
    fn changes(&self) -> Option<broadcast::Receiver<TokenChange>> {
        None
    }
}

/// In-memory token store
///
/// Clones share the slot and publish every write on the change channel, so
/// two managers over clones of one store behave like two tabs of one
/// browser profile.
#[derive(Clone)]
pub struct InMemoryTokenStore {
    slot: std::sync::Arc<RwLock<Option<Credential>>>,
    changes: broadcast::Sender<TokenChange>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            slot: std::sync::Arc::new(RwLock::new(None)),
            changes,
        }
    }
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self) -> CoreResult<Option<Credential>> {
        Ok(self.slot.read().await.clone())
    }

    async fn save(&self, credential: &Credential) -> CoreResult<()> {
        *self.slot.write().await = Some(credential.clone());
        let _ = self.changes.send(TokenChange::Saved);
        Ok(())
    }

    async fn clear(&self) -> CoreResult<()> {
        *self.slot.write().await = None;
        let _ = self.changes.send(TokenChange::Cleared);
        Ok(())
    }

    fn changes(&self) -> Option<broadcast::Receiver<TokenChange>> {
        Some(self.changes.subscribe())
    }
}
