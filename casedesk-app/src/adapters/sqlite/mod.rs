//! SQLite-based unified store using `SeaORM`.
//!
//! A single `SqliteStore` implements `TokenStore` and `CacheStore`, backed
//! by a local `SQLite` database.

mod cache_store;
pub(crate) mod entity;
mod migration;
mod token_store;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use casedesk_core::error::{CoreError, CoreResult};
use casedesk_core::types::TokenChange;
use sea_orm::{Database, DatabaseConnection, EntityTrait};
use sea_orm_migration::MigratorTrait;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use entity::credential;
use migration::Migrator;

/// Default interval between reads of the credential row.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// SQLite-based store for the session credential and the persistent
/// cache tier.
///
/// Credential writes through this store are published right away. Writes
/// by other stores on the same file (another instance, another process)
/// are picked up by polling the credential row while anyone listens.
pub struct SqliteStore {
    /// Shared `SeaORM` database connection.
    pub(crate) db: DatabaseConnection,
    changes: broadcast::Sender<TokenChange>,
    /// Credential row as last written or observed by this store. Held
    /// across each write and each poll so the two never interleave.
    pub(crate) last_seen: Arc<tokio::sync::Mutex<Option<credential::Model>>>,
    poll_interval: Duration,
    poller: Mutex<Option<AbortHandle>>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and bring the schema up
    /// to date.
    ///
    /// # Errors
    /// Returns `CoreError::StorageError` if directory creation, database
    /// connection, or schema migration fails.
    pub async fn new(db_path: &Path) -> CoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::StorageError(format!("Failed to create directory: {e}")))?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let db = Database::connect(&db_url)
            .await
            .map_err(|e| CoreError::StorageError(format!("Failed to connect to SQLite: {e}")))?;

        // Ensure schema is up to date before the store is used.
        Migrator::up(&db, None)
            .await
            .map_err(|e| CoreError::StorageError(format!("Failed to run migrations: {e}")))?;

        let current = credential::Entity::find_by_id(credential::SESSION_ROW)
            .one(&db)
            .await
            .map_err(|e| CoreError::StorageError(format!("Failed to query credential: {e}")))?;

        let (changes, _) = broadcast::channel(16);
        log::info!("Opened SQLite store at {}", db_path.display());
        Ok(Self {
            db,
            changes,
            last_seen: Arc::new(tokio::sync::Mutex::new(current)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poller: Mutex::new(None),
        })
    }

    /// How often the credential row is re-read for foreign writes.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Announce a write made through this store.
    pub(crate) fn publish(&self, change: TokenChange) {
        // No listeners is fine
        let _ = self.changes.send(change);
    }

    /// Subscribe, starting the poller if it is not running.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TokenChange> {
        let receiver = self.changes.subscribe();

        let mut poller = lock(&self.poller);
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return receiver;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("No async runtime, foreign credential writes will not be observed");
            return receiver;
        };

        let task = runtime.spawn(poll_credential(
            self.db.clone(),
            Arc::clone(&self.last_seen),
            self.changes.clone(),
            self.poll_interval,
        ));
        *poller = Some(task.abort_handle());
        receiver
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.poller).take() {
            handle.abort();
        }
    }
}

/// Re-read the credential row until nobody listens, publishing every
/// difference from the last row seen.
async fn poll_credential(
    db: DatabaseConnection,
    last_seen: Arc<tokio::sync::Mutex<Option<credential::Model>>>,
    changes: broadcast::Sender<TokenChange>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    log::debug!("Polling SQLite credential every {}ms", interval.as_millis());

    loop {
        ticker.tick().await;
        if changes.receiver_count() == 0 {
            log::debug!("No credential listeners left, polling stopped");
            return;
        }

        let change = {
            let mut seen = last_seen.lock().await;
            let row = match credential::Entity::find_by_id(credential::SESSION_ROW)
                .one(&db)
                .await
            {
                Ok(row) => row,
                Err(e) => {
                    log::warn!("Failed to poll credential: {e}");
                    continue;
                }
            };
            if *seen == row {
                continue;
            }
            let change = if row.is_some() {
                TokenChange::Saved
            } else {
                TokenChange::Cleared
            };
            *seen = row;
            change
        };
        log::debug!("Credential changed by another writer: {change:?}");
        let _ = changes.send(change);
    }
}
