//! Client configuration
//!
//! Deserialized from the `[api]` table of the embedding application's TOML
//! file. Only `base_url` is required.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    /// Per-call timeout applied when a request does not override it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Timeout for the renewal POST itself
    #[serde(default = "default_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// Path prefixes whose failures never reach the notifier
    #[serde(default = "default_silent_endpoints")]
    pub silent_endpoints: Vec<String>,
    /// Renew before dispatch when the access token expires within this many
    /// seconds. 0 disables proactive renewal.
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_silent_endpoints() -> Vec<String> {
    vec!["/health".to_owned()]
}

fn default_refresh_threshold_secs() -> u64 {
    60
}

impl ClientConfig {
    /// Defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: default_timeout_ms(),
            refresh_timeout_ms: default_timeout_ms(),
            silent_endpoints: default_silent_endpoints(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
        }
    }

    pub fn validate(&self) -> common::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }

        if self.timeout_ms == 0 {
            return Err(common::Error::Config(
                "timeout_ms must be greater than 0".into(),
            ));
        }

        if self.refresh_timeout_ms == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// `None` when proactive renewal is disabled.
    pub fn refresh_threshold(&self) -> Option<Duration> {
        (self.refresh_threshold_secs > 0).then(|| Duration::from_secs(self.refresh_threshold_secs))
    }

    /// Whether failures on `path` are kept from the notifier.
    ///
    /// An entry matches itself and anything below it on a segment boundary:
    /// `/health` covers `/health/db` and `/health?deep=1`, not `/healthcare`.
    pub fn is_silent(&self, path: &str) -> bool {
        self.silent_endpoints.iter().any(|entry| {
            let entry = entry.trim_end_matches('/');
            match path.strip_prefix(entry) {
                Some(rest) => rest.is_empty() || rest.starts_with(['/', '?']),
                None => false,
            }
        })
    }

    /// `base_url` + `path`, with exactly one slash between them.
    pub(crate) fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
