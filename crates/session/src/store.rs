//! Process-wide session holder
//!
//! `SessionStore` owns the current `Session` and mirrors every mutation to a
//! `KeyValueStore`. Each mutation is one critical section under a std
//! `RwLock`, so concurrent readers see either the old or the new session and
//! never a mix. The in-memory state is authoritative: a failed persistence
//! write is logged and does not undo the mutation.
//!
//! Every credential mutation bumps the session epoch. Callers snapshot the
//! epoch together with the headers so they can tell later whether the
//! credential they sent is still the current one.

use std::sync::{Arc, PoisonError, RwLock};

use common::SecretString;
use tracing::{debug, info, warn};

use crate::constants::{ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY, TENANT_ID_KEY};
use crate::error::Result;
use crate::persistence::{KeyValueStore, MemoryStore};
use crate::session::{Credentials, Session};

/// Header values derived from the session at one instant.
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    authorization: Option<SecretString>,
    tenant_id: Option<String>,
    epoch: u64,
}

impl AuthHeaders {
    /// `Bearer <access>`, or `None` when logged out.
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_ref().map(|v| v.expose().as_str())
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Session epoch these headers were read at.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Default)]
struct State {
    session: Session,
    epoch: u64,
}

pub struct SessionStore {
    state: RwLock<State>,
    persistence: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    /// Hydrate from persistence. Runs once, synchronously, before any request.
    ///
    /// A token pair with only one half present violates the session invariant;
    /// it is treated as logged out and the leftover keys are purged.
    pub fn hydrate(persistence: Arc<dyn KeyValueStore>) -> Result<Self> {
        let access = persistence.get(ACCESS_TOKEN_KEY)?;
        let refresh = persistence.get(REFRESH_TOKEN_KEY)?;
        let tenant_id = persistence.get(TENANT_ID_KEY)?;
        let expires_at = persistence
            .get(EXPIRES_AT_KEY)?
            .and_then(|v| v.parse::<u64>().ok());

        let credentials = match (access, refresh) {
            (Some(access), Some(refresh)) => {
                Some(Credentials::new(access, refresh).with_expires_at(expires_at))
            }
            (None, None) => None,
            _ => {
                warn!("persisted session has only one token of the pair, discarding");
                persistence.apply(&[
                    (ACCESS_TOKEN_KEY, None),
                    (REFRESH_TOKEN_KEY, None),
                    (EXPIRES_AT_KEY, None),
                ])?;
                None
            }
        };

        info!(
            authenticated = credentials.is_some(),
            tenant = tenant_id.as_deref().unwrap_or("-"),
            "session hydrated"
        );

        Ok(Self {
            state: RwLock::new(State {
                session: Session {
                    credentials,
                    tenant_id,
                },
                epoch: 0,
            }),
            persistence,
        })
    }

    /// Logged-out store backed by a `MemoryStore`.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(State::default()),
            persistence: Arc::new(MemoryStore::new()),
        }
    }

    /// Read the outgoing headers. Pure read; absent fields yield no header.
    pub fn headers(&self) -> AuthHeaders {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        AuthHeaders {
            authorization: state
                .session
                .access_token()
                .map(|token| SecretString::new(format!("Bearer {token}"))),
            tenant_id: state.session.tenant_id.clone(),
            epoch: state.epoch,
        }
    }

    /// Clone of the current session.
    pub fn snapshot(&self) -> Session {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .clone()
    }

    pub fn epoch(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).epoch
    }

    /// Clone of the current session together with its epoch, read atomically.
    pub fn versioned_snapshot(&self) -> (Session, u64) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (state.session.clone(), state.epoch)
    }

    pub fn refresh_token(&self) -> Option<SecretString> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.session.credentials.as_ref().map(|c| c.refresh.clone())
    }

    /// Replace credentials and tenant in one step (login).
    pub fn set_session(&self, credentials: Credentials, tenant_id: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.session = Session {
            credentials: Some(credentials),
            tenant_id,
        };
        state.epoch += 1;
        self.persist(&state.session);
        info!(epoch = state.epoch, "session established");
    }

    /// Install a renewed token pair, keeping the tenant.
    ///
    /// Applies only if the session is still at `expected_epoch`; a login or
    /// logout that happened while the renewal was in flight wins. Returns
    /// whether the pair was installed.
    pub fn update_credentials(&self, expected_epoch: u64, credentials: Credentials) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.epoch != expected_epoch {
            debug!(
                expected_epoch,
                epoch = state.epoch,
                "session changed during renewal, discarding renewed credentials"
            );
            return false;
        }
        state.session.credentials = Some(credentials);
        state.epoch += 1;
        self.persist(&state.session);
        debug!(epoch = state.epoch, "credentials renewed");
        true
    }

    /// Null out every field. Idempotent in content; the epoch still advances so
    /// in-flight callers can tell the session they used is gone.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.session = Session::default();
        state.epoch += 1;
        self.persist(&state.session);
        info!(epoch = state.epoch, "session cleared");
    }

    /// Clear the session only if it is still at `expected_epoch`. Used when a
    /// renewal fails, so a fresh login made meanwhile is not thrown away.
    pub fn expire(&self, expected_epoch: u64) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.epoch != expected_epoch {
            return false;
        }
        state.session = Session::default();
        state.epoch += 1;
        self.persist(&state.session);
        info!(epoch = state.epoch, "session expired");
        true
    }

    /// Switch tenant without re-authenticating. Affects only requests that
    /// have not been dispatched yet.
    pub fn set_tenant(&self, tenant_id: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.session.tenant_id = tenant_id;
        if let Err(e) = self
            .persistence
            .apply(&[(TENANT_ID_KEY, state.session.tenant_id.as_deref())])
        {
            warn!(error = %e, "failed to persist tenant");
        }
        debug!(tenant = state.session.tenant_id.as_deref().unwrap_or("-"), "tenant switched");
    }

    fn persist(&self, session: &Session) {
        let expires_at = session.expires_at().map(|v| v.to_string());
        let changes = [
            (ACCESS_TOKEN_KEY, session.access_token()),
            (REFRESH_TOKEN_KEY, session.refresh_token()),
            (TENANT_ID_KEY, session.tenant_id.as_deref()),
            (EXPIRES_AT_KEY, expires_at.as_deref()),
        ];
        if let Err(e) = self.persistence.apply(&changes) {
            warn!(error = %e, "failed to persist session");
        }
    }
}
