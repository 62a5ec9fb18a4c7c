//! UI side-effect seam
//!
//! The pipeline never renders anything itself. User-visible notifications and
//! navigation go through a `Notifier` supplied by the embedder.

use tracing::{info, warn};

use crate::error::ClassifiedError;

pub trait Notifier: Send + Sync {
    /// Show a failure to the user. Not called for silenced calls or for
    /// `AUTH_ERROR`, which is handled by `redirect`.
    fn notify(&self, path: &str, error: &ClassifiedError);

    /// Navigate to `route`. Fired at most once per failed renewal cycle.
    fn redirect(&self, route: &str);
}

/// Default notifier for headless embedders: logs instead of rendering.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, path: &str, error: &ClassifiedError) {
        warn!(
            %path,
            kind = %error.kind(),
            status = error.status(),
            message = error.message(),
            "request failed"
        );
    }

    fn redirect(&self, route: &str) {
        info!(%route, "redirect requested");
    }
}
