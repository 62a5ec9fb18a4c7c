//! Request pipeline
//!
//! Single entry point for every outgoing call. Attaches the session headers
//! at dispatch time, bounds each attempt with the per-call timeout, and turns
//! every failure into a `ClassifiedError`.
//!
//! An `AUTH_ERROR` on the first attempt is never returned directly: the call
//! waits on the `RefreshCoordinator` and, if a fresh credential comes back,
//! is replayed exactly once with freshly read headers. A second `AUTH_ERROR`
//! is surfaced as-is.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use session::{AuthHeaders, SessionStore, TENANT_HEADER, now_millis};
use tracing::{debug, instrument, warn};

use crate::classify::{Outcome, classify};
use crate::config::ClientConfig;
use crate::error::{ApiResult, ClassifiedError, ErrorKind};
use crate::notify::Notifier;
use crate::refresh::{CredentialRenewer, HttpRenewer, RefreshCoordinator, RefreshOutcome};

/// One logical call: method, path relative to the base URL, optional JSON
/// body and query, optional timeout override, notification switch.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    query: Vec<(String, String)>,
    timeout: Option<Duration>,
    notify: bool,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            timeout: None,
            notify: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Override the configured per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keep failures of this call away from the notifier.
    pub fn silent(mut self) -> Self {
        self.notify = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Clone)]
pub struct RequestPipeline {
    client: reqwest::Client,
    config: Arc<ClientConfig>,
    session: Arc<SessionStore>,
    coordinator: RefreshCoordinator,
    notifier: Arc<dyn Notifier>,
}

impl RequestPipeline {
    /// Pipeline that renews credentials against the backend's refresh
    /// endpoint.
    pub fn new(
        config: ClientConfig,
        session: Arc<SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> common::Result<Self> {
        let client = reqwest::Client::new();
        let renewer = Arc::new(HttpRenewer::new(
            client.clone(),
            config.base_url.clone(),
            config.refresh_timeout(),
        ));
        Self::build(client, config, session, notifier, renewer)
    }

    /// Pipeline with a custom renewal strategy.
    pub fn with_renewer(
        config: ClientConfig,
        session: Arc<SessionStore>,
        notifier: Arc<dyn Notifier>,
        renewer: Arc<dyn CredentialRenewer>,
    ) -> common::Result<Self> {
        Self::build(reqwest::Client::new(), config, session, notifier, renewer)
    }

    fn build(
        client: reqwest::Client,
        config: ClientConfig,
        session: Arc<SessionStore>,
        notifier: Arc<dyn Notifier>,
        renewer: Arc<dyn CredentialRenewer>,
    ) -> common::Result<Self> {
        config.validate()?;
        let coordinator = RefreshCoordinator::new(session.clone(), renewer, notifier.clone());
        Ok(Self {
            client,
            config: Arc::new(config),
            session,
            coordinator,
            notifier,
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Run one call to completion. Never panics; every failure is classified.
    ///
    /// An empty success body decodes from JSON `null`, so `T = ()` or
    /// `Option<_>` suits no-content endpoints.
    pub async fn request<T: DeserializeOwned>(&self, req: RequestSpec) -> ApiResult<T> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().simple());
        let started = Instant::now();

        let result = self.execute(&req, request_id).await;

        crate::metrics::record_request(
            req.method.as_str(),
            result.as_ref().err(),
            started.elapsed().as_secs_f64(),
        );
        if let Err(err) = &result {
            self.report(&req, err);
        }
        result
    }

    #[instrument(skip_all, fields(request_id = %request_id, method = %req.method, path = %req.path))]
    async fn execute<T: DeserializeOwned>(
        &self,
        req: &RequestSpec,
        request_id: String,
    ) -> ApiResult<T> {
        self.renew_if_expiring().await?;

        let headers = self.session.headers();
        let err = match self.attempt(req, &headers).await {
            Err(err) if err.kind() == ErrorKind::AuthError => err,
            other => return other,
        };

        debug!(epoch = headers.epoch(), "credential rejected, waiting for renewal");
        match self.coordinator.wait_for_refresh(headers.epoch()).await {
            RefreshOutcome::Retry => {
                debug!("replaying with renewed credential");
                let headers = self.session.headers();
                self.attempt(req, &headers).await
            }
            RefreshOutcome::Failed => Err(err),
        }
    }

    /// Join the renewal cycle before dispatch when the access token is about
    /// to expire. See `Session::renewal_due` for the window.
    async fn renew_if_expiring(&self) -> ApiResult<()> {
        let Some(threshold) = self.config.refresh_threshold() else {
            return Ok(());
        };
        let (session, epoch) = self.session.versioned_snapshot();
        if !session.renewal_due(threshold, now_millis()) {
            return Ok(());
        }

        debug!(epoch, "access token near expiry, renewing before dispatch");
        match self.coordinator.wait_for_refresh(epoch).await {
            RefreshOutcome::Retry => Ok(()),
            RefreshOutcome::Failed => Err(classify(Outcome::Status {
                status: 401,
                body: None,
            })),
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        req: &RequestSpec,
        headers: &AuthHeaders,
    ) -> ApiResult<T> {
        let mut builder = self
            .client
            .request(req.method.clone(), self.config.url(&req.path))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if let Some(authorization) = headers.authorization() {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        if let Some(tenant) = headers.tenant_id() {
            builder = builder.header(TENANT_HEADER, tenant);
        }
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let timeout = req.timeout.unwrap_or_else(|| self.config.timeout());
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        };

        let (status, bytes) = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(exchange)) => exchange,
            Ok(Err(e)) => return Err(transport_error(e)),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "request timed out");
                return Err(classify(Outcome::Cancelled));
            }
        };

        if !status.is_success() {
            debug!(status = status.as_u16(), "request rejected");
            return Err(classify(Outcome::Status {
                status: status.as_u16(),
                body: serde_json::from_slice(&bytes).ok(),
            }));
        }
        decode(status.as_u16(), &bytes)
    }

    /// Hand a surfaced failure to the notifier unless it is silenced.
    ///
    /// `AUTH_ERROR` is excluded: the coordinator already fired the redirect.
    fn report(&self, req: &RequestSpec, err: &ClassifiedError) {
        if err.kind() == ErrorKind::AuthError {
            return;
        }
        if !req.notify || self.config.is_silent(&req.path) {
            debug!(path = %req.path, kind = %err.kind(), "failure not notified");
            return;
        }
        self.notifier.notify(&req.path, err);
    }
}

fn transport_error(e: reqwest::Error) -> ClassifiedError {
    if e.is_timeout() {
        classify(Outcome::Cancelled)
    } else if e.is_builder() {
        ClassifiedError::unexpected(None, format!("building request: {e}"))
    } else {
        classify(Outcome::NoResponse {
            reason: e.to_string(),
        })
    }
}

fn decode<T: DeserializeOwned>(status: u16, bytes: &[u8]) -> ApiResult<T> {
    let decoded = if bytes.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(serde_json::Value::Null)
    } else {
        serde_json::from_slice(bytes)
    };
    decoded.map_err(|e| ClassifiedError::unexpected(Some(status), format!("decoding response: {e}")))
}
