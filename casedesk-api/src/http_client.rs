//! Request execution shared by the auth endpoints and resource requests.
//!
//! Only 429 and 502/503/504 are turned into errors here. Every other status,
//! including 401, comes back as a [`RawResponse`] for the caller to interpret.

use std::time::Duration;

use reqwest::RequestBuilder;

use crate::error::{ApiError, ApiResult};
use crate::utils::log_sanitizer::truncate_for_log;

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body trimmed for error messages, `None` when blank.
    pub fn message(&self) -> Option<String> {
        if self.body.trim().is_empty() {
            None
        } else {
            Some(truncate_for_log(&self.body))
        }
    }
}

/// Transport retry settings for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first. 0 disables retry.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on a server-supplied `Retry-After`
    pub retry_after_cap: Duration,
}

impl RetryPolicy {
    pub const NONE: Self = Self {
        max_retries: 0,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(10),
        retry_after_cap: Duration::from_secs(30),
    };

    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::NONE
        }
    }

    /// Wait before retry number `attempt` (0-based).
    fn delay(&self, error: &ApiError, attempt: u32) -> Duration {
        if let ApiError::RateLimited {
            retry_after: Some(secs),
            ..
        } = error
        {
            return Duration::from_secs(*secs).min(self.retry_after_cap);
        }
        let factor = 1_u32 << attempt.min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

fn transport_error(e: &reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout {
            detail: e.to_string(),
        }
    } else {
        ApiError::NetworkError {
            detail: e.to_string(),
        }
    }
}

/// Send one request. `action` labels the exchange in logs.
pub async fn send_once(builder: RequestBuilder, action: &str) -> ApiResult<RawResponse> {
    log::debug!("[api] -> {action}");

    let response = builder.send().await.map_err(|e| transport_error(&e))?;
    let status = response.status().as_u16();

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let body = response.text().await;

    match status {
        429 => {
            log::warn!("[api] {action} rate limited, retry_after={retry_after:?}");
            Err(ApiError::RateLimited {
                retry_after,
                raw_message: body.ok(),
            })
        }
        502..=504 => {
            let body = body.unwrap_or_default();
            log::warn!("[api] {action} upstream unavailable (HTTP {status})");
            Err(ApiError::NetworkError {
                detail: format!("HTTP {status}: {}", truncate_for_log(&body)),
            })
        }
        _ => {
            let body = body.map_err(|e| ApiError::NetworkError {
                detail: format!("Failed to read response body: {e}"),
            })?;
            log::debug!("[api] <- {action} {status} {}", truncate_for_log(&body));
            Ok(RawResponse { status, body })
        }
    }
}

/// Send with exponential backoff on transient failures.
///
/// Requests whose body cannot be cloned are sent once.
pub async fn send_with_retry(
    builder: RequestBuilder,
    action: &str,
    policy: RetryPolicy,
) -> ApiResult<RawResponse> {
    let mut attempt = 0;
    loop {
        let exhausted = attempt >= policy.max_retries;
        let Some(request) = (!exhausted).then(|| builder.try_clone()).flatten() else {
            if !exhausted {
                log::warn!("[api] {action} body is not cloneable, sending without retry");
            }
            return send_once(builder, action).await;
        };

        match send_once(request, action).await {
            Err(e) if e.is_retryable() => {
                let delay = policy.delay(&e, attempt);
                attempt += 1;
                log::warn!(
                    "[api] {action} failed (attempt {attempt}/{}), retrying in {:.1}s: {e}",
                    policy.max_retries + 1,
                    delay.as_secs_f32(),
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}
