//! Dialog client error types

use thiserror::Error;

/// Dialog failure with classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct DialogError {
    pub kind: DialogErrorKind,
    pub message: String,
    /// HTTP status when the backend answered at all
    pub status: Option<u16>,
}

impl DialogError {
    pub fn new(kind: DialogErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(DialogErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(DialogErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(DialogErrorKind::InvalidRequest, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(DialogErrorKind::ServerError, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(DialogErrorKind::Malformed, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(DialogErrorKind::Rejected, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(DialogErrorKind::Unknown, message)
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogErrorKind {
    /// Backend unreachable or the connection dropped
    Network,
    /// API key refused (401, 403)
    Auth,
    /// Request refused as invalid (400, 422)
    InvalidRequest,
    /// Backend failure (5xx)
    ServerError,
    /// 2xx whose body does not match the response contract
    Malformed,
    /// 2xx carrying `status: "error"`
    Rejected,
    /// Anything else
    Unknown,
}

impl DialogErrorKind {
    /// Whether sending the same text again may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::ServerError)
    }
}
