//! Login and logout
//!
//! Login bypasses the renewal path: a 401 from the login endpoint means wrong
//! credentials, so it is classified and returned without touching the
//! `RefreshCoordinator`.

use common::SecretString;
use session::{Credentials, LoginRequest, Session, now_millis};
use tracing::{info, warn};

use crate::classify::classify_token_error;
use crate::error::ApiResult;
use crate::pipeline::RequestPipeline;

#[derive(Clone)]
pub struct AuthClient {
    pipeline: RequestPipeline,
}

impl AuthClient {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    /// Exchange email and password for a session.
    ///
    /// The tenant comes from the login response when the backend sends one;
    /// otherwise the currently selected tenant is kept.
    pub async fn login(&self, email: &str, password: SecretString) -> ApiResult<Session> {
        let config = self.pipeline.config();
        let request = LoginRequest {
            email: email.to_owned(),
            password,
        };

        let token = session::login(
            self.pipeline.client(),
            &config.base_url,
            &request,
            config.timeout(),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "login failed");
            classify_token_error(e)
        })?;

        let expires_at = token.expires_at(now_millis());
        // login() guarantees a refresh token
        let refresh = token.refresh_token.unwrap_or_default();
        let credentials = Credentials::new(token.access_token, refresh).with_expires_at(expires_at);

        let store = self.pipeline.session();
        let tenant_id = token.tenant_id.or_else(|| store.snapshot().tenant_id);
        store.set_session(credentials, tenant_id);
        info!("logged in");

        Ok(store.snapshot())
    }

    /// Drop the session. Local only; no backend call.
    pub fn logout(&self) {
        self.pipeline.session().clear();
        info!("logged out");
    }

    /// Select the tenant for subsequent requests.
    pub fn switch_tenant(&self, tenant_id: Option<String>) {
        self.pipeline.session().set_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::ErrorKind;
    use crate::testing::{RecordingNotifier, serve};
    use axum::Json;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use serde_json::json;
    use session::SessionStore;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    async fn login_handler(Json(body): Json<serde_json::Value>) -> Response {
        match (body["email"].as_str(), body["password"].as_str()) {
            (Some("ops@example.com"), Some("hunter2")) => Json(json!({
                "access_token": "T1",
                "refresh_token": "R1",
                "expires_in": 900
            }))
            .into_response(),
            (Some("tenant@example.com"), Some("hunter2")) => Json(json!({
                "access_token": "T1",
                "refresh_token": "R1",
                "tenant_id": "globex"
            }))
            .into_response(),
            _ => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"message": "invalid credentials"})),
            )
                .into_response(),
        }
    }

    async fn client() -> (AuthClient, Arc<SessionStore>, Arc<RecordingNotifier>) {
        let base = serve(axum::Router::new().route("/auth/login", post(login_handler))).await;
        let session = Arc::new(SessionStore::in_memory());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline =
            RequestPipeline::new(ClientConfig::new(base), session.clone(), notifier.clone())
                .unwrap();
        (AuthClient::new(pipeline), session, notifier)
    }

    #[tokio::test]
    async fn login_installs_session_and_keeps_selected_tenant() {
        let (auth, session, _) = client().await;
        auth.switch_tenant(Some("acme".into()));

        let logged_in = auth.login("ops@example.com", "hunter2".into()).await.unwrap();
        assert_eq!(logged_in.access_token(), Some("T1"));
        assert_eq!(logged_in.refresh_token(), Some("R1"));
        assert_eq!(logged_in.tenant_id.as_deref(), Some("acme"));
        assert!(logged_in.expires_at().is_some());
        assert_eq!(session.headers().authorization(), Some("Bearer T1"));
    }

    #[tokio::test]
    async fn login_takes_tenant_from_response() {
        let (auth, _, _) = client().await;
        auth.switch_tenant(Some("acme".into()));

        let logged_in = auth.login("tenant@example.com", "hunter2".into()).await.unwrap();
        assert_eq!(logged_in.tenant_id.as_deref(), Some("globex"));
    }

    #[tokio::test]
    async fn wrong_password_is_auth_error_without_redirect() {
        let (auth, session, notifier) = client().await;

        let err = auth
            .login("ops@example.com", "wrong".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthError);
        assert_eq!(err.status(), Some(401));
        assert!(!session.snapshot().is_authenticated());
        assert!(notifier.redirects().is_empty());
    }

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn login_logs_do_not_contain_the_email() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(captured.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (auth, _, _) = client().await;
        auth.login("ops@example.com", "hunter2".into()).await.unwrap();
        let _ = auth.login("ops@example.com", "wrong".into()).await;

        let logs = captured.contents();
        assert!(logs.contains("logged in"), "logs: {logs}");
        assert!(!logs.contains("ops@example.com"), "logs: {logs}");
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let (auth, session, _) = client().await;
        auth.switch_tenant(Some("acme".into()));
        auth.login("ops@example.com", "hunter2".into()).await.unwrap();

        auth.logout();
        assert_eq!(session.snapshot(), Session::default());
    }
}
