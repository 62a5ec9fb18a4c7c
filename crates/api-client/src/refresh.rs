//! Single-flight credential renewal
//!
//! Every call that hits an expired credential parks here. The first one of a
//! burst starts a renewal; the rest queue behind it. When the renewal ends,
//! all queued callers are released with the same outcome in arrival order.
//!
//! The transition logic is a pure function (`handle_event`) so it can be
//! tested without HTTP. `RefreshCoordinator` executes the actions it returns.
//!
//! State machine:
//!
//! ```text
//! Idle ──(expired, current epoch)──▶ Refreshing{queue:[w]}   StartRenewal
//! Idle ──(expired, stale epoch)────▶ Idle                    Resolve(w)
//! Refreshing ──(expired)───────────▶ Refreshing{queue+w}     Enqueued
//! Refreshing ──(renewal finished)──▶ Idle                    FanOut(queue)
//! ```
//!
//! A stale epoch means the credential already changed after the caller sent
//! its request, so another renewal would be redundant: the caller retries if
//! a credential is present and fails otherwise.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::SecretString;
use session::{Credentials, SessionStore, TokenResponse, now_millis};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::LOGIN_ROUTE;
use crate::notify::Notifier;

/// What a parked caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A fresh credential is installed: replay the request once.
    Retry,
    /// The session is gone: surface `AUTH_ERROR`.
    Failed,
}

/// Performs the actual renewal call.
///
/// Returns a boxed future so the trait stays dyn-compatible and can be held
/// as `Arc<dyn CredentialRenewer>`.
pub trait CredentialRenewer: Send + Sync {
    fn renew<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = session::Result<TokenResponse>> + Send + 'a>>;
}

/// Renews against the backend's refresh endpoint.
#[derive(Debug, Clone)]
pub struct HttpRenewer {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRenewer {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }
}

impl CredentialRenewer for HttpRenewer {
    fn renew<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = session::Result<TokenResponse>> + Send + 'a>> {
        Box::pin(session::refresh_session(
            &self.client,
            &self.base_url,
            refresh_token,
            self.timeout,
        ))
    }
}

type Waiter = oneshot::Sender<RefreshOutcome>;

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Refreshing {
        queue: Vec<Waiter>,
    },
}

#[derive(Debug)]
enum Event {
    ExpiredCredential {
        waiter: Waiter,
        /// Epoch of the headers the failed request was sent with
        observed_epoch: u64,
        current_epoch: u64,
        authenticated: bool,
    },
    RenewalFinished(RefreshOutcome),
}

#[derive(Debug)]
enum Action {
    StartRenewal { epoch: u64 },
    Enqueued,
    Resolve { waiter: Waiter, outcome: RefreshOutcome },
    FanOut { queue: Vec<Waiter>, outcome: RefreshOutcome },
    None,
}

fn handle_event(state: State, event: Event) -> (State, Action) {
    match (state, event) {
        (
            State::Idle,
            Event::ExpiredCredential {
                waiter,
                observed_epoch,
                current_epoch,
                authenticated,
            },
        ) => {
            if observed_epoch == current_epoch {
                (
                    State::Refreshing {
                        queue: vec![waiter],
                    },
                    Action::StartRenewal {
                        epoch: current_epoch,
                    },
                )
            } else {
                let outcome = if authenticated {
                    RefreshOutcome::Retry
                } else {
                    RefreshOutcome::Failed
                };
                (State::Idle, Action::Resolve { waiter, outcome })
            }
        }
        (State::Refreshing { mut queue }, Event::ExpiredCredential { waiter, .. }) => {
            queue.push(waiter);
            (State::Refreshing { queue }, Action::Enqueued)
        }
        (State::Refreshing { queue }, Event::RenewalFinished(outcome)) => {
            (State::Idle, Action::FanOut { queue, outcome })
        }
        (State::Idle, Event::RenewalFinished(_)) => (State::Idle, Action::None),
    }
}

struct Inner {
    state: Mutex<State>,
    session: Arc<SessionStore>,
    renewer: Arc<dyn CredentialRenewer>,
    notifier: Arc<dyn Notifier>,
}

/// Serializes credential renewal across all concurrent callers.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        session: Arc<SessionStore>,
        renewer: Arc<dyn CredentialRenewer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Idle),
                session,
                renewer,
                notifier,
            }),
        }
    }

    /// Whether a renewal is in flight.
    pub fn is_refreshing(&self) -> bool {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*state, State::Refreshing { .. })
    }

    /// Park until the credential the caller used at `observed_epoch` has been
    /// dealt with.
    ///
    /// Dropping the returned future abandons only this caller's place in the
    /// queue. The renewal itself runs on its own task.
    pub async fn wait_for_refresh(&self, observed_epoch: u64) -> RefreshOutcome {
        let (waiter, released) = oneshot::channel();

        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            // Read the epoch under the coordinator lock: a renewal installs its
            // credential before it takes this lock to fan out.
            let (session, current_epoch) = self.inner.session.versioned_snapshot();
            let event = Event::ExpiredCredential {
                waiter,
                observed_epoch,
                current_epoch,
                authenticated: session.is_authenticated(),
            };
            let (next, action) = handle_event(std::mem::take(&mut *state), event);
            *state = next;

            match action {
                Action::StartRenewal { epoch } => {
                    debug!(epoch, "starting credential renewal");
                    tokio::spawn(run_renewal(self.inner.clone(), epoch));
                }
                Action::Enqueued => debug!(observed_epoch, "queued behind in-flight renewal"),
                Action::Resolve { waiter, outcome } => {
                    debug!(observed_epoch, current_epoch, ?outcome, "credential already changed");
                    let _ = waiter.send(outcome);
                }
                Action::FanOut { .. } | Action::None => {}
            }
        }

        // A dropped sender means the renewal task died without reporting.
        released.await.unwrap_or(RefreshOutcome::Failed)
    }
}

async fn run_renewal(inner: Arc<Inner>, epoch: u64) {
    let outcome = match renew(&inner, epoch).await {
        Ok(()) => {
            crate::metrics::record_refresh(true);
            RefreshOutcome::Retry
        }
        Err(reason) => {
            crate::metrics::record_refresh(false);
            if inner.session.expire(epoch) {
                warn!(%reason, "credential renewal failed, session cleared");
                inner.notifier.redirect(LOGIN_ROUTE);
                RefreshOutcome::Failed
            } else if inner.session.snapshot().is_authenticated() {
                // A login landed while the renewal was in flight.
                info!(%reason, "credential renewal failed but session was replaced");
                RefreshOutcome::Retry
            } else {
                RefreshOutcome::Failed
            }
        }
    };

    let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
    let (next, action) = handle_event(
        std::mem::take(&mut *state),
        Event::RenewalFinished(outcome),
    );
    if let Action::FanOut { queue, outcome } = action {
        debug!(waiters = queue.len(), ?outcome, "releasing queued callers");
        for waiter in queue {
            // Receiver gone: that caller was cancelled.
            let _ = waiter.send(outcome);
        }
    }
    *state = next;
}

/// Run the renewal call and install the result. Err carries a log-safe reason.
async fn renew(inner: &Inner, epoch: u64) -> Result<(), String> {
    let refresh_token = inner
        .session
        .refresh_token()
        .ok_or_else(|| session::Error::NoRefreshToken.to_string())?;

    // Separate task so a panicking renewer still releases the queue.
    let renewer = inner.renewer.clone();
    let sent_token = refresh_token.clone();
    let token = tokio::spawn(async move { renewer.renew(sent_token.expose()).await })
        .await
        .map_err(|e| format!("renewal task failed: {e}"))?
        .map_err(|e| e.to_string())?;

    let expires_at = token.expires_at(now_millis());
    let refresh = token
        .refresh_token
        .map(SecretString::from)
        .unwrap_or(refresh_token);
    let credentials = Credentials::new(token.access_token, refresh).with_expires_at(expires_at);

    if inner.session.update_credentials(epoch, credentials) {
        info!("credential renewed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;
    use session::Session;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn waiter() -> (Waiter, oneshot::Receiver<RefreshOutcome>) {
        oneshot::channel()
    }

    fn expired(waiter: Waiter, observed: u64, current: u64, authenticated: bool) -> Event {
        Event::ExpiredCredential {
            waiter,
            observed_epoch: observed,
            current_epoch: current,
            authenticated,
        }
    }

    // -- pure transitions --

    #[test]
    fn first_expiry_at_current_epoch_starts_renewal() {
        let (w, _rx) = waiter();
        let (state, action) = handle_event(State::Idle, expired(w, 3, 3, true));
        assert!(matches!(state, State::Refreshing { ref queue } if queue.len() == 1));
        assert!(matches!(action, Action::StartRenewal { epoch: 3 }));
    }

    #[test]
    fn logged_out_expiry_at_current_epoch_still_starts_renewal() {
        let (w, _rx) = waiter();
        let (_, action) = handle_event(State::Idle, expired(w, 0, 0, false));
        assert!(matches!(action, Action::StartRenewal { epoch: 0 }));
    }

    #[test]
    fn expiry_while_refreshing_enqueues() {
        let (w1, _rx1) = waiter();
        let (w2, _rx2) = waiter();
        let (state, _) = handle_event(State::Idle, expired(w1, 1, 1, true));
        let (state, action) = handle_event(state, expired(w2, 1, 1, true));
        assert!(matches!(state, State::Refreshing { ref queue } if queue.len() == 2));
        assert!(matches!(action, Action::Enqueued));
    }

    #[test]
    fn renewal_finished_fans_out_in_arrival_order() {
        let (w1, mut rx1) = waiter();
        let (w2, mut rx2) = waiter();
        let (state, _) = handle_event(State::Idle, expired(w1, 1, 1, true));
        let (state, _) = handle_event(state, expired(w2, 1, 1, true));
        let (state, action) =
            handle_event(state, Event::RenewalFinished(RefreshOutcome::Retry));

        assert!(matches!(state, State::Idle));
        let Action::FanOut { queue, outcome } = action else {
            panic!("expected FanOut");
        };
        assert_eq!(outcome, RefreshOutcome::Retry);
        assert_eq!(queue.len(), 2);
        for w in queue {
            w.send(outcome).unwrap();
        }
        assert_eq!(rx1.try_recv().unwrap(), RefreshOutcome::Retry);
        assert_eq!(rx2.try_recv().unwrap(), RefreshOutcome::Retry);
    }

    #[test]
    fn stale_epoch_resolves_without_renewal() {
        let (w, _rx) = waiter();
        let (state, action) = handle_event(State::Idle, expired(w, 1, 2, true));
        assert!(matches!(state, State::Idle));
        assert!(matches!(
            action,
            Action::Resolve {
                outcome: RefreshOutcome::Retry,
                ..
            }
        ));

        let (w, _rx) = waiter();
        let (_, action) = handle_event(State::Idle, expired(w, 1, 2, false));
        assert!(matches!(
            action,
            Action::Resolve {
                outcome: RefreshOutcome::Failed,
                ..
            }
        ));
    }

    #[test]
    fn stray_renewal_finished_is_ignored() {
        let (state, action) =
            handle_event(State::Idle, Event::RenewalFinished(RefreshOutcome::Failed));
        assert!(matches!(state, State::Idle));
        assert!(matches!(action, Action::None));
    }

    // -- coordinator --

    struct FakeRenewer {
        calls: AtomicUsize,
        delay: Duration,
        response: fn() -> session::Result<TokenResponse>,
    }

    impl FakeRenewer {
        fn new(delay: Duration, response: fn() -> session::Result<TokenResponse>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                response,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CredentialRenewer for FakeRenewer {
        fn renew<'a>(
            &'a self,
            _refresh_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = session::Result<TokenResponse>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                (self.response)()
            })
        }
    }

    fn renewed() -> session::Result<TokenResponse> {
        Ok(TokenResponse {
            access_token: "at_2".into(),
            refresh_token: None,
            expires_in: Some(900),
            tenant_id: None,
        })
    }

    fn rotated() -> session::Result<TokenResponse> {
        Ok(TokenResponse {
            access_token: "at_2".into(),
            refresh_token: Some("rt_2".into()),
            expires_in: None,
            tenant_id: None,
        })
    }

    fn rejected() -> session::Result<TokenResponse> {
        Err(session::Error::Rejected {
            status: 401,
            body: None,
        })
    }

    fn logged_in() -> Arc<SessionStore> {
        let session = Arc::new(SessionStore::in_memory());
        session.set_session(Credentials::new("at_1", "rt_1"), Some("acme".into()));
        session
    }

    fn coordinator(
        session: &Arc<SessionStore>,
        renewer: &Arc<FakeRenewer>,
        notifier: &Arc<RecordingNotifier>,
    ) -> RefreshCoordinator {
        RefreshCoordinator::new(session.clone(), renewer.clone(), notifier.clone())
    }

    #[tokio::test]
    async fn concurrent_waiters_share_one_renewal() {
        let session = logged_in();
        let renewer = FakeRenewer::new(Duration::from_millis(50), renewed);
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(&session, &renewer, &notifier);
        let epoch = session.epoch();

        let outcomes = futures_util::future::join_all(
            (0..5).map(|_| coordinator.wait_for_refresh(epoch)),
        )
        .await;

        assert!(outcomes.iter().all(|o| *o == RefreshOutcome::Retry));
        assert_eq!(renewer.calls(), 1);
        assert!(!coordinator.is_refreshing());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.access_token(), Some("at_2"));
        assert_eq!(snapshot.refresh_token(), Some("rt_1"), "old refresh token kept");
        assert_eq!(snapshot.tenant_id.as_deref(), Some("acme"));
        assert!(snapshot.expires_at().is_some());
        assert!(notifier.redirects().is_empty());
    }

    #[tokio::test]
    async fn rotated_refresh_token_replaces_old_one() {
        let session = logged_in();
        let renewer = FakeRenewer::new(Duration::ZERO, rotated);
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(&session, &renewer, &notifier);

        let outcome = coordinator.wait_for_refresh(session.epoch()).await;
        assert_eq!(outcome, RefreshOutcome::Retry);
        assert_eq!(session.snapshot().refresh_token(), Some("rt_2"));
    }

    #[tokio::test]
    async fn failed_renewal_clears_session_and_redirects_once() {
        let session = logged_in();
        let renewer = FakeRenewer::new(Duration::from_millis(20), rejected);
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(&session, &renewer, &notifier);
        let epoch = session.epoch();

        let outcomes = futures_util::future::join_all(
            (0..4).map(|_| coordinator.wait_for_refresh(epoch)),
        )
        .await;

        assert!(outcomes.iter().all(|o| *o == RefreshOutcome::Failed));
        assert_eq!(renewer.calls(), 1);
        assert_eq!(session.snapshot(), Session::default());
        assert_eq!(notifier.redirects(), vec!["/login".to_string()]);
    }

    #[tokio::test]
    async fn late_waiter_after_success_retries_without_renewal() {
        let session = logged_in();
        let renewer = FakeRenewer::new(Duration::ZERO, renewed);
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(&session, &renewer, &notifier);
        let epoch = session.epoch();

        assert_eq!(coordinator.wait_for_refresh(epoch).await, RefreshOutcome::Retry);
        // A 401 for a request sent with the old credential arrives afterwards
        assert_eq!(coordinator.wait_for_refresh(epoch).await, RefreshOutcome::Retry);
        assert_eq!(renewer.calls(), 1);
    }

    #[tokio::test]
    async fn late_waiter_after_failure_fails_without_second_redirect() {
        let session = logged_in();
        let renewer = FakeRenewer::new(Duration::ZERO, rejected);
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(&session, &renewer, &notifier);
        let epoch = session.epoch();

        assert_eq!(coordinator.wait_for_refresh(epoch).await, RefreshOutcome::Failed);
        assert_eq!(coordinator.wait_for_refresh(epoch).await, RefreshOutcome::Failed);
        assert_eq!(renewer.calls(), 1);
        assert_eq!(notifier.redirects().len(), 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_calling_renewer() {
        let session = Arc::new(SessionStore::in_memory());
        let renewer = FakeRenewer::new(Duration::ZERO, renewed);
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(&session, &renewer, &notifier);

        let outcome = coordinator.wait_for_refresh(session.epoch()).await;
        assert_eq!(outcome, RefreshOutcome::Failed);
        assert_eq!(renewer.calls(), 0);
        assert_eq!(notifier.redirects().len(), 1);
    }

    #[tokio::test]
    async fn login_during_renewal_wins() {
        let session = logged_in();
        let renewer = FakeRenewer::new(Duration::from_millis(50), renewed);
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(&session, &renewer, &notifier);
        let epoch = session.epoch();

        let waiting = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.wait_for_refresh(epoch).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.set_session(Credentials::new("at_relogin", "rt_relogin"), None);

        assert_eq!(waiting.await.unwrap(), RefreshOutcome::Retry);
        assert_eq!(session.snapshot().access_token(), Some("at_relogin"));
    }

    #[tokio::test]
    async fn failed_renewal_after_relogin_keeps_new_session() {
        let session = logged_in();
        let renewer = FakeRenewer::new(Duration::from_millis(50), rejected);
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(&session, &renewer, &notifier);
        let epoch = session.epoch();

        let waiting = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.wait_for_refresh(epoch).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.set_session(Credentials::new("at_relogin", "rt_relogin"), None);

        assert_eq!(waiting.await.unwrap(), RefreshOutcome::Retry);
        assert!(session.snapshot().is_authenticated());
        assert!(notifier.redirects().is_empty());
    }

    #[tokio::test]
    async fn cancelling_the_trigger_does_not_abandon_the_cycle() {
        let session = logged_in();
        let renewer = FakeRenewer::new(Duration::from_millis(50), renewed);
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(&session, &renewer, &notifier);
        let epoch = session.epoch();

        let trigger = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.wait_for_refresh(epoch).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.wait_for_refresh(epoch).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.abort();

        assert_eq!(follower.await.unwrap(), RefreshOutcome::Retry);
        assert_eq!(renewer.calls(), 1);
        assert_eq!(session.snapshot().access_token(), Some("at_2"));
    }
}
