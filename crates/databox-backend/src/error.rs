//! Backend error types.

use thiserror::Error;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors returned by a [`crate::ContainerBackend`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} conflict: {name}")]
    Conflict { kind: &'static str, name: String },

    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("backend unreachable: {0}")]
    Unavailable(String),

    #[error("malformed backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn conflict(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
