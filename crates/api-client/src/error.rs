//! Error taxonomy surfaced to collaborators
//!
//! Every failed call resolves to exactly one `ClassifiedError`. Collaborators
//! branch on `kind()` or `status()`, never on message text.

use serde::Serialize;

/// Route the UI must navigate to when the session cannot be recovered.
pub const LOGIN_ROUTE: &str = "/login";

/// Route the UI must navigate to on a permission failure.
pub const FORBIDDEN_ROUTE: &str = "/403";

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No response received (connect, DNS, reset)
    NetworkError,
    /// 5xx
    ServerError,
    /// 401: expired or invalid credential
    AuthError,
    /// 403
    ForbiddenError,
    /// 404
    NotFoundError,
    /// 422 with field errors
    ValidationError,
    /// Per-call timeout elapsed
    TimeoutError,
    /// Any other status, or a response that could not be decoded
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::AuthError => "AUTH_ERROR",
            ErrorKind::ForbiddenError => "FORBIDDEN_ERROR",
            ErrorKind::NotFoundError => "NOT_FOUND_ERROR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::TimeoutError => "TIMEOUT_ERROR",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Whether a collaborator may offer the user a retry action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::ServerError
                | ErrorKind::TimeoutError
                | ErrorKind::UnknownError
        )
    }

    /// Route the UI must honor for this kind, if any.
    pub fn redirect_to(&self) -> Option<&'static str> {
        match self {
            ErrorKind::AuthError => Some(LOGIN_ROUTE),
            ErrorKind::ForbiddenError => Some(FORBIDDEN_ROUTE),
            _ => None,
        }
    }

    /// Default (message, localized message) pair.
    fn messages(&self) -> (&'static str, &'static str) {
        match self {
            ErrorKind::NetworkError => (
                "Unable to reach the server. Check your connection.",
                "No se pudo conectar con el servidor. Verifique su conexión.",
            ),
            ErrorKind::ServerError => (
                "The server encountered an error. Please try again.",
                "El servidor encontró un error. Intente nuevamente.",
            ),
            ErrorKind::AuthError => (
                "Your session has expired. Please sign in again.",
                "Su sesión ha expirado. Inicie sesión nuevamente.",
            ),
            ErrorKind::ForbiddenError => (
                "You do not have permission to perform this action.",
                "No tiene permisos para realizar esta acción.",
            ),
            ErrorKind::NotFoundError => (
                "The requested resource was not found.",
                "El recurso solicitado no existe.",
            ),
            ErrorKind::ValidationError => (
                "The submitted data is invalid.",
                "Los datos enviados no son válidos.",
            ),
            ErrorKind::TimeoutError => (
                "The request timed out.",
                "La solicitud excedió el tiempo de espera.",
            ),
            ErrorKind::UnknownError => (
                "An unexpected error occurred.",
                "Ocurrió un error inesperado.",
            ),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call, classified. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    status: Option<u16>,
    message: String,
    message_localized: String,
    retryable: bool,
    redirect_to: Option<&'static str>,
    data: Option<serde_json::Value>,
}

impl ClassifiedError {
    /// Build an error of `kind`. `message` replaces both catalog messages when
    /// the backend supplied one.
    pub(crate) fn new(
        kind: ErrorKind,
        status: Option<u16>,
        message: Option<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        let (default_message, default_localized) = kind.messages();
        let (message, message_localized) = match message {
            Some(m) => (m.clone(), m),
            None => (default_message.to_owned(), default_localized.to_owned()),
        };
        Self {
            kind,
            status,
            message,
            message_localized,
            retryable: kind.is_retryable(),
            redirect_to: kind.redirect_to(),
            data,
        }
    }

    /// A local failure with no meaningful HTTP classification (undecodable
    /// body, unserializable request). Detail goes into `data`.
    pub(crate) fn unexpected(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnknownError,
            status,
            None,
            Some(serde_json::json!({ "detail": detail.into() })),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn message_localized(&self) -> &str {
        &self.message_localized
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn redirect_to(&self) -> Option<&'static str> {
        self.redirect_to
    }

    /// Response body (or local detail) attached to the failure.
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    /// Wire shape handed to UI collaborators.
    pub fn envelope(&self) -> ErrorEnvelope<'_> {
        ErrorEnvelope {
            success: false,
            kind: self.kind,
            status: self.status,
            message: &self.message,
            message_localized: &self.message_localized,
            data: self.data.as_ref(),
        }
    }
}

/// `{ success: false, kind, status, message, message_localized, data }`
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    pub success: bool,
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: &'a str,
    pub message_localized: &'a str,
    pub data: Option<&'a serde_json::Value>,
}

/// Result of any call through the pipeline.
pub type ApiResult<T> = std::result::Result<T, ClassifiedError>;
