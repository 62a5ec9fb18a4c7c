//! Session data model
//!
//! The access and refresh tokens travel together in one `Credentials` value,
//! so a session can never hold one without the other.

use std::time::Duration;

use common::SecretString;

use crate::jwt;

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// An access/refresh token pair.
///
/// `expires_at` is a unix timestamp in milliseconds for the access token,
/// when known. `issued_at` is when this process obtained the pair (for a
/// hydrated session, when it was loaded), so `expires_at - issued_at` is the
/// lifetime as observed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access: SecretString,
    pub refresh: SecretString,
    pub expires_at: Option<u64>,
    pub issued_at: u64,
}

impl Credentials {
    /// Build a pair, reading the expiry from the access token's `exp` claim
    /// when it is a JWT.
    pub fn new(access: impl Into<SecretString>, refresh: impl Into<SecretString>) -> Self {
        let access = access.into();
        let expires_at = jwt::expiry_millis(access.expose());
        Self {
            access,
            refresh: refresh.into(),
            expires_at,
            issued_at: now_millis(),
        }
    }

    /// Override the expiry (e.g. from a token response's `expires_in`).
    pub fn with_expires_at(mut self, expires_at: Option<u64>) -> Self {
        if expires_at.is_some() {
            self.expires_at = expires_at;
        }
        self
    }
}

/// Snapshot of the client's authentication state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub credentials: Option<Credentials>,
    pub tenant_id: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.access.expose().as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.refresh.expose().as_str())
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.credentials.as_ref().and_then(|c| c.expires_at)
    }

    /// Whether the access token should be renewed ahead of use.
    ///
    /// The window is `threshold`, capped at half the observed lifetime. A pair
    /// that lives shorter than the threshold is therefore renewed once per
    /// lifetime, not on every call.
    pub fn renewal_due(&self, threshold: Duration, now: u64) -> bool {
        let Some(credentials) = &self.credentials else {
            return false;
        };
        let Some(expires_at) = credentials.expires_at else {
            return false;
        };
        let half_life = expires_at.saturating_sub(credentials.issued_at) / 2;
        let window = (threshold.as_millis() as u64).min(half_life);
        expires_at <= now.saturating_add(window)
    }
}
