#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Test helpers
//!
//! Scriptable mocks and convenience factories.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use casedesk_api::{ApiClient, ApiError, ApiResult};

use crate::error::{CoreError, CoreResult};
use crate::traits::{CacheStore, ManualClock};
use crate::types::{ApiRequest, ApiResponse, CacheRecord, LoginRequest, Partition, TokenGrant};

pub fn grant(token: &str, expires_in: u64) -> TokenGrant {
    TokenGrant {
        token: token.to_string(),
        expires_in,
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap()
}

pub fn manual_clock() -> ManualClock {
    ManualClock::new(epoch())
}

// ===== MockApiClient =====

/// `ApiClient` with queued responses.
///
/// Empty queues fall back to: login grants `login-token`, refresh fails
/// with a network error, send answers 200 `{}`.
pub struct MockApiClient {
    refresh_results: Mutex<VecDeque<ApiResult<TokenGrant>>>,
    send_results: Mutex<VecDeque<ApiResult<ApiResponse>>>,
    sent_tokens: Mutex<Vec<Option<String>>>,
    logout_error: Option<ApiError>,
    refresh_delay: Option<Duration>,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    send_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl MockApiClient {
    pub fn new() -> Self {
        Self {
            refresh_results: Mutex::new(VecDeque::new()),
            send_results: Mutex::new(VecDeque::new()),
            sent_tokens: Mutex::new(Vec::new()),
            logout_error: None,
            refresh_delay: None,
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    pub fn with_logout_error(mut self, error: ApiError) -> Self {
        self.logout_error = Some(error);
        self
    }

    pub fn push_refresh(&self, result: ApiResult<TokenGrant>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    pub fn push_send(&self, result: ApiResult<ApiResponse>) {
        self.send_results.lock().unwrap().push_back(result);
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    /// Bearer tokens seen by `send`, in call order.
    pub fn sent_tokens(&self) -> Vec<Option<String>> {
        self.sent_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn login(&self, _request: &LoginRequest) -> ApiResult<TokenGrant> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        Ok(grant("login-token", 3600))
    }

    async fn refresh(&self, _current_token: &str) -> ApiResult<TokenGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.refresh_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Err(ApiError::NetworkError {
                detail: "no scripted refresh response".to_string(),
            })
        })
    }

    async fn logout(&self, _token: &str) -> ApiResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        match &self.logout_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn send(&self, _request: &ApiRequest, bearer: Option<&str>) -> ApiResult<ApiResponse> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent_tokens
            .lock()
            .unwrap()
            .push(bearer.map(str::to_string));
        let next = self.send_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ApiResponse::new(200, "{}")))
    }
}

// ===== FailingCacheStore =====

/// Persistent tier that is entirely unavailable.
pub struct FailingCacheStore;

fn unavailable<T>() -> CoreResult<T> {
    Err(CoreError::StorageError("storage unavailable".to_string()))
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn put(&self, _record: CacheRecord) -> CoreResult<()> {
        unavailable()
    }

    async fn get(&self, _partition: Partition, _key: &str) -> CoreResult<Option<CacheRecord>> {
        unavailable()
    }

    async fn touch(&self, _partition: Partition, _key: &str, _at: DateTime<Utc>) -> CoreResult<()> {
        unavailable()
    }

    async fn delete(&self, _partition: Partition, _key: &str) -> CoreResult<()> {
        unavailable()
    }

    async fn delete_many(&self, _partition: Partition, _keys: &[String]) -> CoreResult<()> {
        unavailable()
    }

    async fn count(&self, _partition: Partition) -> CoreResult<u64> {
        unavailable()
    }

    async fn oldest_keys(&self, _partition: Partition, _limit: u64) -> CoreResult<Vec<String>> {
        unavailable()
    }

    async fn keys_for_tenant(
        &self,
        _partition: Partition,
        _tenant_id: &str,
    ) -> CoreResult<Vec<String>> {
        unavailable()
    }

    async fn clear(&self, _partition: Partition) -> CoreResult<()> {
        unavailable()
    }
}
