//! Failure classification
//!
//! Maps a raw transport outcome onto the `ErrorKind` taxonomy. Pure: no I/O,
//! no session mutation. The pipeline decides what to do with an `AUTH_ERROR`;
//! this module only names it.

use crate::error::{ClassifiedError, ErrorKind};

/// What the transport produced for one attempt.
#[derive(Debug)]
pub enum Outcome {
    /// No response received: unreachable host, DNS failure, connection refused.
    NoResponse { reason: String },
    /// The server answered with a non-success status (or a success whose body
    /// could not be used).
    Status {
        status: u16,
        body: Option<serde_json::Value>,
    },
    /// The per-call timeout elapsed before the response completed.
    Cancelled,
}

/// Classify an outcome. Total over every `Outcome`.
///
/// Status mapping: 401 → AUTH, 403 → FORBIDDEN, 404 → NOT_FOUND,
/// 422 → VALIDATION (message from the body when present), ≥500 → SERVER,
/// anything else → UNKNOWN.
pub fn classify(outcome: Outcome) -> ClassifiedError {
    match outcome {
        Outcome::NoResponse { reason } => ClassifiedError::new(
            ErrorKind::NetworkError,
            None,
            None,
            Some(serde_json::json!({ "detail": reason })),
        ),
        Outcome::Cancelled => ClassifiedError::new(ErrorKind::TimeoutError, None, None, None),
        Outcome::Status { status, body } => {
            let kind = kind_for_status(status);
            let message = match kind {
                ErrorKind::ValidationError => body.as_ref().and_then(body_message),
                _ => None,
            };
            ClassifiedError::new(kind, Some(status), message, body)
        }
    }
}

/// Classify a failure from the login/refresh token endpoints.
pub fn classify_token_error(err: session::Error) -> ClassifiedError {
    match err {
        session::Error::Http(reason) => classify(Outcome::NoResponse { reason }),
        session::Error::Timeout(_) => classify(Outcome::Cancelled),
        session::Error::Rejected { status, body } => classify(Outcome::Status { status, body }),
        other => ClassifiedError::unexpected(None, other.to_string()),
    }
}

fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        401 => ErrorKind::AuthError,
        403 => ErrorKind::ForbiddenError,
        404 => ErrorKind::NotFoundError,
        422 => ErrorKind::ValidationError,
        s if s >= 500 => ErrorKind::ServerError,
        _ => ErrorKind::UnknownError,
    }
}

/// Human-readable message from a backend error body, if it carries one.
fn body_message(body: &serde_json::Value) -> Option<String> {
    ["message", "error", "detail"]
        .iter()
        .filter_map(|field| body.get(field).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(str::to_owned)
}
