use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes surfaced to callers. `Auth` is the only kind that
/// triggers a session clear; everything else is reported and recoverable
/// by an explicit retry or a fresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Auth,
    Validation,
    NotFound,
    RateLimited,
    Internal,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Classify a plain HTTP status. 403 is treated as an auth failure
    /// here; callers that can see rate-limit headers should map an
    /// exhausted quota to `RateLimited` before falling back to this.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Auth,
            404 => ErrorKind::NotFound,
            408 => ErrorKind::Network,
            422 => ErrorKind::Validation,
            429 => ErrorKind::RateLimited,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, message)
    }

    pub fn is_auth(&self) -> bool {
        self.kind == ErrorKind::Auth
    }
}
