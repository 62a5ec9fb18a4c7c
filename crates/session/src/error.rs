//! Error types for session and token operations

/// Errors from session persistence and token endpoint calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request never produced a response (connect, DNS, reset).
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The token endpoint answered with a non-2xx status.
    #[error("token endpoint returned {status}")]
    Rejected {
        status: u16,
        body: Option<serde_json::Value>,
    },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("no refresh token in session")]
    NoRefreshToken,

    #[error("session parse error: {0}")]
    SessionParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
