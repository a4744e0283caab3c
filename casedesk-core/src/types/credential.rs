//! Credential types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use casedesk_api::log_sanitizer::mask_token;

/// Bearer credential held by the credential manager.
///
/// Once `now >= expires_at` the credential counts as absent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque bearer token
    pub token: String,
    /// Absolute expiry
    #[serde(rename = "expiresAt")]
    #[serde(with = "crate::utils::datetime")]
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Credential issued at `now` that lives for `expires_in_secs`.
    #[must_use]
    pub fn issued_at(token: impl Into<String>, now: DateTime<Utc>, expires_in_secs: u64) -> Self {
        let lifetime = i64::try_from(expires_in_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        let expires_at = now
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(token, expires_at)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left until expiry, zero once expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Not yet expired but inside the refresh threshold.
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        !self.is_expired(now) && self.remaining(now) <= threshold
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &mask_token(&self.token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential manager state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AuthState {
    /// No credential
    Unauthenticated,
    /// Holding a credential
    Authenticated {
        #[serde(rename = "expiresAt")]
        #[serde(with = "crate::utils::datetime")]
        expires_at: DateTime<Utc>,
    },
    /// A refresh call is in flight
    Refreshing,
    /// The last refresh attempt failed and a retry is pending
    RefreshFailed,
}

/// Notification emitted by the credential manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// `set_credential` (login, restore or cross-instance sync) stored a credential
    CredentialSet { expires_at: DateTime<Utc> },
    /// A refresh replaced the token
    Refreshed { expires_at: DateTime<Utc> },
    /// Explicit logout, or the credential was cleared by another holder of the store
    LoggedOut,
    /// The session cannot be recovered; the UI should navigate to the login entry point
    LoginRequired { reason: String },
}

/// Change published by a [`TokenStore`](crate::traits::TokenStore) when
/// another holder of the same store wrote to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenChange {
    Saved,
    Cleared,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn expiry_is_inclusive() {
        let cred = Credential::issued_at("tok", t0(), 60);
        assert!(!cred.is_expired(t0() + chrono::Duration::seconds(59)));
        assert!(cred.is_expired(t0() + chrono::Duration::seconds(60)));
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let cred = Credential::issued_at("tok", t0(), 10);
        assert_eq!(cred.remaining(t0()), Duration::from_secs(10));
        assert_eq!(
            cred.remaining(t0() + chrono::Duration::seconds(30)),
            Duration::ZERO
        );
    }

    #[test]
    fn within_threshold() {
        let cred = Credential::issued_at("tok", t0(), 600);
        let threshold = Duration::from_secs(300);
        assert!(!cred.expires_within(t0(), threshold));
        assert!(cred.expires_within(t0() + chrono::Duration::seconds(301), threshold));
        assert!(!cred.expires_within(t0() + chrono::Duration::seconds(600), threshold));
    }

    #[test]
    fn huge_lifetime_does_not_overflow() {
        let cred = Credential::issued_at("tok", t0(), u64::MAX);
        assert!(!cred.is_expired(t0()));
    }

    #[test]
    fn debug_masks_token() {
        let cred = Credential::issued_at("eyJhbGciOiJIUzI1NiJ9.payload", t0(), 60);
        let debug = format!("{cred:?}");
        assert!(!debug.contains("payload"));
    }

    #[test]
    fn serializes_expiry_as_camel_case() {
        let cred = Credential::issued_at("tok", t0(), 60);
        let json = serde_json::to_value(&cred).unwrap();
        assert_eq!(json["token"], "tok");
        assert!(json["expiresAt"].as_str().unwrap().starts_with("2026-01-01T00:01:00"));
    }
}
