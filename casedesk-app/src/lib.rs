//! Application bootstrap for the casedesk client core.
//!
//! Provides `AppConfig` (TOML configuration), `AppState` (the one
//! `CredentialManager` and `TieredCache` of the process) and
//! `AppStateBuilder` (adapter injection).

pub mod adapters;
pub mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use casedesk_api::{create_client, ApiClient};
use casedesk_core::error::{CoreError, CoreResult};
use casedesk_core::services::{CredentialManager, TieredCache};
use casedesk_core::traits::{
    CacheStore, Clock, InMemoryCacheStore, InMemoryTokenStore, SystemClock, TokenStore,
};

pub use config::{AppConfig, StorageConfig};

/// Application state.
///
/// Every frontend constructs this once at startup via `AppStateBuilder`
/// (or [`AppState::open`]) and hands out clones of the manager and cache.
pub struct AppState {
    /// Effective configuration
    pub config: AppConfig,
    /// Credential manager
    pub credentials: CredentialManager,
    /// Tiered object cache
    pub cache: TieredCache,
    /// Whether the startup sequence has completed
    pub startup_completed: AtomicBool,
    token_store: Arc<dyn TokenStore>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// Build state from configuration alone.
    ///
    /// Uses `SqliteStore` when `storage.database_path` is set, in-memory
    /// stores otherwise, and the HTTP client described by `api`.
    pub async fn open(config: AppConfig) -> CoreResult<Self> {
        let builder = AppStateBuilder::new().config(config.clone());
        let builder = match &config.storage.database_path {
            #[cfg(feature = "sqlite-store")]
            Some(path) => {
                let store = Arc::new(
                    adapters::SqliteStore::new(path)
                        .await?
                        .with_poll_interval(config.storage.poll_interval()),
                );
                builder
                    .token_store(Arc::clone(&store) as Arc<dyn TokenStore>)
                    .cache_store(store)
            }
            #[cfg(not(feature = "sqlite-store"))]
            Some(_) => {
                return Err(CoreError::ConfigError(
                    "storage.database_path requires the sqlite-store feature".to_string(),
                ));
            }
            None => builder
                .token_store(Arc::new(InMemoryTokenStore::new()))
                .cache_store(Arc::new(InMemoryCacheStore::new())),
        };
        builder.build()
    }

    /// Run the startup sequence: credential restore → cross-instance sync.
    pub async fn run_startup(&self) -> CoreResult<()> {
        if self.credentials.restore().await {
            log::info!("Startup: session restored");
        } else {
            log::info!("Startup: no session to restore");
        }
        self.start_credential_sync();
        self.startup_completed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Follow credential changes made by other holders of the token store.
    ///
    /// No-op for stores that do not publish changes.
    fn start_credential_sync(&self) {
        let Some(mut changes) = self.token_store.changes() else {
            log::debug!("Token store publishes no changes, cross-instance sync disabled");
            return;
        };

        let credentials = self.credentials.clone();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        log::debug!("Token store changed: {change:?}");
                        credentials.sync_from_store().await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Credential sync lagged by {skipped} changes, resyncing");
                        credentials.sync_from_store().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let previous = self
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop background work. Called automatically on drop.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for constructing `AppState` with platform-specific adapters.
///
/// # Required adapters
/// - `token_store`: where the credential is persisted
/// - `cache_store`: the persistent cache tier
///
/// # Optional
/// - `api_client`: defaults to the HTTP client described by `config.api`
/// - `clock`: defaults to `SystemClock`
/// - `config`: defaults to `AppConfig::default()`
pub struct AppStateBuilder {
    config: AppConfig,
    api_client: Option<Arc<dyn ApiClient>>,
    token_store: Option<Arc<dyn TokenStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AppStateBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            api_client: None,
            token_store: None,
            cache_store: None,
            clock: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn api_client(mut self, client: Arc<dyn ApiClient>) -> Self {
        self.api_client = Some(client);
        self
    }

    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    #[must_use]
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the `AppState`.
    ///
    /// # Errors
    /// Returns `CoreError::ValidationError` if required adapters are missing,
    /// `CoreError::ConfigError` if the configuration is invalid.
    pub fn build(self) -> CoreResult<AppState> {
        self.config.validate()?;

        let token_store = self
            .token_store
            .ok_or_else(|| CoreError::ValidationError("token_store is required".to_string()))?;
        let cache_store = self
            .cache_store
            .ok_or_else(|| CoreError::ValidationError("cache_store is required".to_string()))?;
        let api_client = match self.api_client {
            Some(client) => client,
            None => create_client(self.config.api.clone())?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let credentials = CredentialManager::new(
            api_client,
            Arc::clone(&token_store),
            Arc::clone(&clock),
            self.config.auth.clone(),
        );
        let cache = TieredCache::new(cache_store, clock, self.config.cache.clone());

        Ok(AppState {
            config: self.config,
            credentials,
            cache,
            startup_completed: AtomicBool::new(false),
            token_store,
            sync_task: Mutex::new(None),
        })
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
