//! API probe
//!
//! Operator CLI over the API client core:
//! 1. Loads TOML config and hydrates the session from a file store
//! 2. Runs one command (login, logout, tenant, whoami, list, get)
//! 3. Prints the result, or the classified error envelope, as JSON on stdout
//!
//! Logs go to stderr so stdout stays machine-readable. The session file is
//! updated in place, so a renewed token survives into the next invocation.

mod config;
mod metrics;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use api_client::{
    AuthClient, ClassifiedError, CrudService, RequestPipeline, TracingNotifier,
};
use common::SecretString;
use session::{FileStore, SessionStore};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str = "\
usage: api-probe [--config <path>] [--metrics] <command>

commands:
  login <email>             sign in (password from API_PASSWORD)
  logout                    drop the stored session
  tenant [<id>]             select a tenant, or clear it
  whoami                    show the stored session
  list <path> [key=value]…  GET <path> with query parameters
  get <path> <id>           GET <path>/<id>";

#[derive(Debug, PartialEq)]
enum Command {
    Login { email: String, password: SecretString },
    Logout,
    Tenant { tenant_id: Option<String> },
    Whoami,
    List { path: String, query: Vec<(String, String)> },
    Get { path: String, id: String },
}

#[derive(Debug, PartialEq)]
struct Args {
    config: Option<String>,
    metrics: bool,
    command: Command,
}

/// Parse `argv`. `password` is the value of `API_PASSWORD`, required only by
/// `login`.
fn parse_args(args: &[String], password: Option<String>) -> Result<Args> {
    let mut config = None;
    let mut metrics = false;
    let mut positional = Vec::new();

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(iter.next().context("--config requires a path")?.clone());
            }
            "--metrics" => metrics = true,
            "-h" | "--help" => bail!("{USAGE}"),
            _ => positional.push(arg.as_str()),
        }
    }

    let command = match positional.as_slice() {
        ["login", email] => Command::Login {
            email: (*email).to_owned(),
            password: password
                .context("API_PASSWORD must be set for login")?
                .into(),
        },
        ["logout"] => Command::Logout,
        ["tenant"] => Command::Tenant { tenant_id: None },
        ["tenant", id] => Command::Tenant {
            tenant_id: Some((*id).to_owned()),
        },
        ["whoami"] => Command::Whoami,
        ["list", path, query @ ..] => Command::List {
            path: (*path).to_owned(),
            query: parse_query(query)?,
        },
        ["get", path, id] => Command::Get {
            path: (*path).to_owned(),
            id: (*id).to_owned(),
        },
        [] => bail!("missing command\n\n{USAGE}"),
        other => bail!("unrecognized command: {}\n\n{USAGE}", other.join(" ")),
    };

    Ok(Args {
        config,
        metrics,
        command,
    })
}

fn parse_query(pairs: &[&str]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .with_context(|| format!("query parameter must be key=value, got: {pair}"))
        })
        .collect()
}

/// Session, pipeline and auth wired together from config.
struct Probe {
    pipeline: RequestPipeline,
    auth: AuthClient,
}

impl Probe {
    fn new(config: &Config) -> Result<Self> {
        let store = FileStore::open(config.session.path.clone()).with_context(|| {
            format!(
                "failed to open session file {}",
                config.session.path.display()
            )
        })?;
        let session = Arc::new(
            SessionStore::hydrate(Arc::new(store)).context("failed to hydrate session")?,
        );
        if let Some(tenant) = &config.session.tenant_id {
            session.set_tenant(Some(tenant.clone()));
        }

        let pipeline = RequestPipeline::new(config.api.clone(), session, Arc::new(TracingNotifier))
            .context("invalid api configuration")?;
        let auth = AuthClient::new(pipeline.clone());
        Ok(Self { pipeline, auth })
    }

    async fn run(&self, command: Command) -> Result<serde_json::Value, ClassifiedError> {
        match command {
            Command::Login { email, password } => {
                self.auth.login(&email, password).await?;
                Ok(self.whoami())
            }
            Command::Logout => {
                self.auth.logout();
                Ok(serde_json::json!({ "logged_out": true }))
            }
            Command::Tenant { tenant_id } => {
                self.auth.switch_tenant(tenant_id);
                Ok(self.whoami())
            }
            Command::Whoami => Ok(self.whoami()),
            Command::List { path, query } => {
                let query: Vec<(&str, &str)> = query
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let items = CrudService::<serde_json::Value>::new(self.pipeline.clone(), path)
                    .get_all(&query)
                    .await?;
                Ok(serde_json::Value::Array(items))
            }
            Command::Get { path, id } => {
                CrudService::<serde_json::Value>::new(self.pipeline.clone(), path)
                    .get_by_id(id)
                    .await
            }
        }
    }

    /// Session summary without the tokens themselves.
    fn whoami(&self) -> serde_json::Value {
        let session = self.pipeline.session().snapshot();
        serde_json::json!({
            "authenticated": session.is_authenticated(),
            "tenant_id": session.tenant_id,
            "expires_at": session.expires_at(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // JSON logs on stderr, filtered by LOG_LEVEL / RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let argv: Vec<String> = std::env::args().collect();
    let args = parse_args(&argv, std::env::var("API_PASSWORD").ok())?;

    let prometheus = if args.metrics {
        Some(metrics::install_recorder().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.api.base_url,
        session_path = %config.session.path.display(),
        "configuration loaded"
    );

    let probe = Probe::new(&config)?;
    let result = probe.run(args.command).await;

    let exit = match &result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(value)?);
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.envelope())?);
            ExitCode::FAILURE
        }
    };

    if let Some(handle) = prometheus {
        eprintln!("{}", handle.render());
    }

    Ok(exit)
}
