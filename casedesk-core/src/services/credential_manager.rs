//! Credential manager
//!
//! Owns the bearer token and its expiry, keeps it fresh with a background
//! timer, and wraps outbound requests with a single refresh-and-retry on
//! authorization failure.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use casedesk_api::log_sanitizer::mask_token;
use casedesk_api::ApiClient;

use crate::config::AuthConfig;
use crate::error::{CoreError, CoreResult};
use crate::traits::{Clock, TokenStore};
use crate::types::{ApiRequest, ApiResponse, AuthEvent, AuthState, Credential, LoginRequest};

type SharedRefresh = Shared<BoxFuture<'static, CoreResult<Credential>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Refreshing,
    RefreshFailed,
}

struct Session {
    credential: Option<Credential>,
    phase: Phase,
    /// Failed attempts of the current refresh cycle
    retry_count: u32,
}

struct RefreshTimer {
    id: u64,
    handle: AbortHandle,
}

struct Inner {
    api: Arc<dyn ApiClient>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    session: Mutex<Session>,
    events: broadcast::Sender<AuthEvent>,
    in_flight: Mutex<Option<SharedRefresh>>,
    timer: Mutex<Option<RefreshTimer>>,
    next_timer_id: Mutex<u64>,
}

/// Credential manager
///
/// Cheap to clone; clones share one session. Construct once per
/// application and hand clones to whoever needs authenticated requests.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

impl CredentialManager {
    #[must_use]
    pub fn new(
        api: Arc<dyn ApiClient>,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                clock,
                config,
                session: Mutex::new(Session {
                    credential: None,
                    phase: Phase::Idle,
                    retry_count: 0,
                }),
                events,
                in_flight: Mutex::new(None),
                timer: Mutex::new(None),
                next_timer_id: Mutex::new(0),
            }),
        }
    }

    /// Subscribe to auth notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    // ===== Session setup =====

    /// Adopt the persisted credential, if one exists and has not expired.
    ///
    /// Expired credentials are purged from the store. Storage errors are
    /// logged and treated as "nothing persisted".
    pub async fn restore(&self) -> bool {
        let stored = match self.inner.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("[auth] Failed to load persisted credential: {e}");
                return false;
            }
        };

        let Some(credential) = stored else {
            log::debug!("[auth] No persisted credential");
            return false;
        };

        if credential.is_expired(self.inner.clock.now()) {
            log::info!("[auth] Persisted credential expired, purging");
            self.inner.clear_store().await;
            return false;
        }

        log::info!(
            "[auth] Restored credential {} (expires {})",
            mask_token(&credential.token),
            credential.expires_at
        );
        self.inner.adopt(credential);
        true
    }

    /// Log in with the remote endpoint and store the issued credential.
    pub async fn login(&self, username: &str, password: &str) -> CoreResult<()> {
        let grant = self
            .inner
            .api
            .login(&LoginRequest::new(username, password))
            .await?;
        self.set_credential(&grant.token, grant.expires_in).await
    }

    /// Store a freshly issued token.
    ///
    /// Computes the absolute expiry, persists it, resets the retry counter,
    /// (re)starts the refresh timer and emits [`AuthEvent::CredentialSet`].
    pub async fn set_credential(&self, token: &str, expires_in_secs: u64) -> CoreResult<()> {
        if token.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "token must not be empty".to_string(),
            ));
        }

        let credential = Credential::issued_at(token, self.inner.clock.now(), expires_in_secs);
        log::info!(
            "[auth] Credential set {} (expires in {expires_in_secs}s)",
            mask_token(token)
        );
        // Memory first, so a change notification for our own write finds nothing new
        self.inner.adopt(credential.clone());
        self.inner.persist(&credential).await;
        Ok(())
    }

    // ===== Queries =====

    /// The current token, or `None` once the credential has expired.
    ///
    /// An expired credential is purged on the spot, memory and store.
    pub async fn get_token(&self) -> Option<String> {
        let now = self.inner.clock.now();
        let expired = {
            let mut session = lock(&self.inner.session);
            match &session.credential {
                Some(credential) if !credential.is_expired(now) => {
                    return Some(credential.token.clone());
                }
                Some(_) => {
                    session.credential = None;
                    session.phase = Phase::Idle;
                    true
                }
                None => false,
            }
        };

        if expired {
            log::info!("[auth] Credential expired, purging");
            self.inner.cancel_timer();
            self.inner.clear_store().await;
        }
        None
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.live_credential().is_some()
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        let now = self.inner.clock.now();
        let session = lock(&self.inner.session);
        match session.phase {
            Phase::Refreshing => AuthState::Refreshing,
            Phase::RefreshFailed => AuthState::RefreshFailed,
            Phase::Idle => match &session.credential {
                Some(credential) if !credential.is_expired(now) => AuthState::Authenticated {
                    expires_at: credential.expires_at,
                },
                _ => AuthState::Unauthenticated,
            },
        }
    }

    /// Failed attempts of the refresh cycle in progress, reset on success.
    #[must_use]
    pub fn failed_refresh_attempts(&self) -> u32 {
        lock(&self.inner.session).retry_count
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner.live_credential().map(|c| c.expires_at)
    }

    // ===== Refresh =====

    /// Refresh the token.
    ///
    /// Concurrent callers share one in-flight refresh. Failed attempts are
    /// retried with exponential backoff up to `max_refresh_attempts`; when
    /// all fail the session ends and [`AuthEvent::LoginRequired`] is emitted.
    pub async fn refresh(&self) -> CoreResult<()> {
        let refresh = {
            let mut slot = lock(&self.inner.in_flight);
            if let Some(existing) = slot.as_ref() {
                log::debug!("[auth] Joining in-flight refresh");
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let refresh = async move {
                    let result = inner.run_refresh().await;
                    *lock(&inner.in_flight) = None;
                    result
                }
                .boxed()
                .shared();
                *slot = Some(refresh.clone());
                refresh
            }
        };
        refresh.await.map(|_| ())
    }

    /// React to the page becoming visible or hidden.
    ///
    /// A visible page holding a credential inside the refresh threshold
    /// refreshes right away instead of waiting for a throttled timer.
    pub async fn on_visibility_change(&self, visible: bool) {
        if !visible {
            return;
        }
        let now = self.inner.clock.now();
        let Some(credential) = self.inner.held_credential() else {
            return;
        };
        if credential.is_expired(now) {
            let _ = self.get_token().await;
            return;
        }
        if credential.expires_within(now, self.inner.config.refresh_threshold()) {
            log::info!("[auth] Page visible near expiry, refreshing");
            if let Err(e) = self.refresh().await {
                log::warn!("[auth] Visibility refresh failed: {e}");
            }
        }
    }

    // ===== Authenticated requests =====

    /// Send a request with the bearer token attached.
    ///
    /// A 401 while a credential is held triggers exactly one refresh and
    /// one retry. A 401 that cannot be recovered ends the session and fails
    /// with [`CoreError::Unauthorized`].
    pub async fn authenticated_fetch(&self, request: &ApiRequest) -> CoreResult<ApiResponse> {
        let token = self.get_token().await;
        let response = self.inner.api.send(request, token.as_deref()).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if token.is_none() || self.inner.live_credential().is_none() {
            let reason = format!("{} {} denied without a credential", request.method, request.path);
            self.inner.end_session(&reason).await;
            return Err(CoreError::Unauthorized(reason));
        }

        log::info!(
            "[auth] {} {} returned 401, refreshing and retrying once",
            request.method,
            request.path
        );
        self.refresh().await?;

        let token = self.get_token().await.ok_or(CoreError::NotAuthenticated)?;
        let retried = self.inner.api.send(request, Some(&token)).await?;
        if retried.is_unauthorized() {
            let reason = format!("{} {} denied after refresh", request.method, request.path);
            self.inner.end_session(&reason).await;
            return Err(CoreError::Unauthorized(reason));
        }
        Ok(retried)
    }

    // ===== Teardown and sync =====

    /// Log out. Never fails.
    ///
    /// The remote logout is best-effort; local state is cleared regardless.
    pub async fn logout(&self) {
        self.inner.cancel_timer();
        let credential = {
            let mut session = lock(&self.inner.session);
            session.phase = Phase::Idle;
            session.retry_count = 0;
            session.credential.take()
        };

        if let Some(credential) = credential {
            if let Err(e) = self.inner.api.logout(&credential.token).await {
                log::warn!("[auth] Remote logout failed, continuing locally: {e}");
            }
        }

        self.inner.clear_store().await;
        log::info!("[auth] Logged out");
        self.inner.emit(AuthEvent::LoggedOut);
    }

    /// Re-read the persisted credential after another holder of the store
    /// changed it.
    pub async fn sync_from_store(&self) {
        let stored = match self.inner.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("[auth] Failed to re-read credential store: {e}");
                return;
            }
        };
        let now = self.inner.clock.now();
        let stored = stored.filter(|c| !c.is_expired(now));
        let current = self.inner.held_credential();

        match (stored, current) {
            (Some(stored), Some(current)) if stored == current => {}
            (Some(stored), _) => {
                log::info!("[auth] Adopting credential written by another instance");
                self.inner.adopt(stored);
            }
            (None, Some(_)) => {
                log::info!("[auth] Credential cleared by another instance");
                self.inner.cancel_timer();
                {
                    let mut session = lock(&self.inner.session);
                    session.credential = None;
                    session.phase = Phase::Idle;
                    session.retry_count = 0;
                }
                self.inner.emit(AuthEvent::LoggedOut);
            }
            (None, None) => {}
        }
    }
}

impl Inner {
    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn held_credential(&self) -> Option<Credential> {
        lock(&self.session).credential.clone()
    }

    fn live_credential(&self) -> Option<Credential> {
        let now = self.clock.now();
        self.held_credential().filter(|c| !c.is_expired(now))
    }

    async fn persist(&self, credential: &Credential) {
        if let Err(e) = self.store.save(credential).await {
            log::warn!("[auth] Failed to persist credential: {e}");
        }
    }

    async fn clear_store(&self) {
        if let Err(e) = self.store.clear().await {
            log::warn!("[auth] Failed to clear persisted credential: {e}");
        }
    }

    /// Install a credential in memory, arm the timer and notify.
    fn adopt(self: &Arc<Self>, credential: Credential) {
        let expires_at = credential.expires_at;
        {
            let mut session = lock(&self.session);
            session.credential = Some(credential);
            session.phase = Phase::Idle;
            session.retry_count = 0;
        }
        self.schedule_refresh(expires_at);
        self.emit(AuthEvent::CredentialSet { expires_at });
    }

    /// Drop the session after an unrecoverable failure.
    async fn end_session(&self, reason: &str) {
        self.cancel_timer();
        {
            let mut session = lock(&self.session);
            session.credential = None;
            session.phase = Phase::Idle;
            session.retry_count = 0;
        }
        self.clear_store().await;
        log::warn!("[auth] Session ended: {reason}");
        self.emit(AuthEvent::LoginRequired {
            reason: reason.to_string(),
        });
    }

    fn cancel_timer(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.handle.abort();
        }
    }

    /// Arm the background timer to fire `refresh_threshold` before expiry.
    fn schedule_refresh(self: &Arc<Self>, expires_at: chrono::DateTime<chrono::Utc>) {
        let fire_at = chrono::Duration::from_std(self.config.refresh_threshold())
            .ok()
            .and_then(|threshold| expires_at.checked_sub_signed(threshold))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        let delay = (fire_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let id = {
            let mut next = lock(&self.next_timer_id);
            *next += 1;
            *next
        };
        let weak: Weak<Inner> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Disarm first so rescheduling from inside the refresh does not abort this task
            {
                let mut timer = lock(&inner.timer);
                if timer.as_ref().is_some_and(|t| t.id == id) {
                    *timer = None;
                }
            }
            log::debug!("[auth] Refresh timer fired");
            if let Err(e) = (CredentialManager { inner }).refresh().await {
                log::warn!("[auth] Scheduled refresh failed: {e}");
            }
        });

        let previous = lock(&self.timer).replace(RefreshTimer {
            id,
            handle: task.abort_handle(),
        });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        log::debug!("[auth] Refresh scheduled in {}s", delay.as_secs());
    }

    async fn run_refresh(self: &Arc<Self>) -> CoreResult<Credential> {
        let max_attempts = self.config.max_refresh_attempts;
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let Some(current) = self.live_credential() else {
                if self.held_credential().is_some() {
                    // Expired during an attempt or a backoff
                    self.end_session("credential expired during refresh").await;
                } else {
                    lock(&self.session).phase = Phase::Idle;
                }
                return Err(CoreError::NotAuthenticated);
            };
            lock(&self.session).phase = Phase::Refreshing;

            match self.api.refresh(&current.token).await {
                Ok(grant) => {
                    let credential =
                        Credential::issued_at(grant.token, self.clock.now(), grant.expires_in);
                    {
                        let mut session = lock(&self.session);
                        if session.credential.is_none() {
                            // Logged out while the call was in flight
                            session.phase = Phase::Idle;
                            return Err(CoreError::NotAuthenticated);
                        }
                        session.credential = Some(credential.clone());
                        session.phase = Phase::Idle;
                        session.retry_count = 0;
                    }
                    self.persist(&credential).await;
                    self.schedule_refresh(credential.expires_at);
                    log::info!(
                        "[auth] Token refreshed {} (expires {})",
                        mask_token(&credential.token),
                        credential.expires_at
                    );
                    self.emit(AuthEvent::Refreshed {
                        expires_at: credential.expires_at,
                    });
                    return Ok(credential);
                }
                Err(e) => {
                    {
                        let mut session = lock(&self.session);
                        session.phase = Phase::RefreshFailed;
                        session.retry_count = attempt + 1;
                    }
                    log::warn!(
                        "[auth] Refresh attempt {}/{max_attempts} failed: {e}",
                        attempt + 1
                    );
                    last_error = e.to_string();
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        self.end_session(&format!("token refresh failed after {max_attempts} attempts"))
            .await;
        Err(CoreError::RefreshExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
