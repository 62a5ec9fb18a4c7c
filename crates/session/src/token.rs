//! Token endpoint calls
//!
//! Handles the two backend interactions that produce a token pair:
//! 1. Login with user credentials (`POST /auth/login`)
//! 2. Renewal with a refresh token (`POST /auth/refresh`)
//!
//! Both are JSON POSTs relative to the API base URL and share response
//! handling: any non-2xx status or a body without `access_token` is an error.

use std::time::Duration;

use common::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{LOGIN_PATH, REFRESH_PATH};
use crate::error::{Error, Result};
use crate::jwt;

/// Response from the login and refresh endpoints.
///
/// `expires_in` is a delta in seconds from the response time. The refresh
/// endpoint may omit `refresh_token`, in which case the current one stays
/// valid.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry in unix milliseconds: from `expires_in` when present,
    /// else from the access token's `exp` claim.
    pub fn expires_at(&self, now_millis: u64) -> Option<u64> {
        match self.expires_in {
            Some(secs) => Some(now_millis.saturating_add(secs.saturating_mul(1000))),
            None => jwt::expiry_millis(&self.access_token),
        }
    }
}

/// User credentials for the login endpoint.
#[derive(Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: SecretString,
}

/// Exchange user credentials for a token pair.
pub async fn login(
    client: &reqwest::Client,
    base_url: &str,
    request: &LoginRequest,
    timeout: Duration,
) -> Result<TokenResponse> {
    let body = serde_json::json!({
        "email": request.email,
        "password": request.password.expose(),
    });
    let token = post_token_endpoint(client, &endpoint(base_url, LOGIN_PATH), &body, timeout).await?;
    if token.refresh_token.is_none() {
        return Err(Error::MalformedResponse(
            "login response has no refresh_token".into(),
        ));
    }
    Ok(token)
}

/// Renew the access token using a refresh token.
///
/// Called reactively when a request fails with an expired credential and
/// proactively when the access token is about to expire.
pub async fn refresh_session(
    client: &reqwest::Client,
    base_url: &str,
    refresh_token: &str,
    timeout: Duration,
) -> Result<TokenResponse> {
    let body = serde_json::json!({ "refresh_token": refresh_token });
    post_token_endpoint(client, &endpoint(base_url, REFRESH_PATH), &body, timeout).await
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

async fn post_token_endpoint(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    timeout: Duration,
) -> Result<TokenResponse> {
    let response = client
        .post(url)
        .json(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{url}: {e}"))
            } else {
                Error::Http(format!("{url}: {e}"))
            }
        })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            Error::Timeout(format!("reading {url}: {e}"))
        } else {
            Error::Http(format!("reading {url}: {e}"))
        }
    })?;

    if !status.is_success() {
        debug!(%url, status = status.as_u16(), "token endpoint rejected request");
        return Err(Error::Rejected {
            status: status.as_u16(),
            body: serde_json::from_slice(&bytes).ok(),
        });
    }

    let token: TokenResponse = serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedResponse(format!("invalid token response: {e}")))?;
    if token.access_token.is_empty() {
        return Err(Error::MalformedResponse("empty access_token".into()));
    }
    Ok(token)
}
