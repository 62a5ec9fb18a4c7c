//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Credentials are never read from the TOML: the session file holds tokens
//! and the password for `login` comes from the `API_PASSWORD` env var.

use std::path::{Path, PathBuf};

use api_client::ClientConfig;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ClientConfig,
    pub session: SessionConfig,
}

/// Where the session lives between runs
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    pub path: PathBuf,
    /// Tenant applied at start-up, replacing the persisted one
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// - `API_BASE_URL` replaces `api.base_url`
    /// - `API_TENANT_ID` replaces `session.tenant_id`
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(base_url) = std::env::var("API_BASE_URL") {
            config.api.base_url = base_url;
        }
        if let Ok(tenant) = std::env::var("API_TENANT_ID") {
            let tenant = tenant.trim().to_owned();
            config.session.tenant_id = (!tenant.is_empty()).then_some(tenant);
        }

        config.api.validate()?;

        if config.session.path.as_os_str().is_empty() {
            return Err(common::Error::Config("session.path must not be empty".into()));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("api-probe.toml")
    }
}
