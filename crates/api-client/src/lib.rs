//! Resilient API client core
//!
//! Every outgoing call goes through `RequestPipeline::request`, which attaches
//! the bearer token and tenant header from the `SessionStore`, applies a
//! per-call timeout, and classifies any failure into a closed `ErrorKind`
//! taxonomy. An expired credential (401) on a first attempt does not reach the
//! caller: the call parks on the `RefreshCoordinator`, which renews the
//! credential once for the whole burst of failing calls and then replays each
//! of them exactly once.
//!
//! Call lifecycle:
//! 1. Collaborator calls a `CrudService` operation (or `request` directly)
//! 2. Pipeline reads headers from the session at dispatch time
//! 3. Transport outcome is classified by `classify()`
//! 4. `AUTH_ERROR` on attempt one → `RefreshCoordinator::wait_for_refresh`
//! 5. Renewal succeeded → replay once; renewal failed → `AUTH_ERROR`, session
//!    cleared, one redirect to the login route
//! 6. Other errors surface as `ClassifiedError` and, unless silenced, reach
//!    the `Notifier`

pub mod auth;
pub mod classify;
pub mod config;
pub mod crud;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod refresh;

#[cfg(test)]
mod testing;

pub use auth::AuthClient;
pub use classify::{Outcome, classify, classify_token_error};
pub use config::ClientConfig;
pub use crud::CrudService;
pub use error::{ApiResult, ClassifiedError, ErrorEnvelope, ErrorKind};
pub use notify::{Notifier, TracingNotifier};
pub use pipeline::{RequestPipeline, RequestSpec};
pub use refresh::{CredentialRenewer, HttpRenewer, RefreshCoordinator, RefreshOutcome};
