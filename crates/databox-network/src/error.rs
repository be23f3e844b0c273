//! Network error types.

use databox_backend::BackendError;
use databox_client::ClientError;
use thiserror::Error;

use crate::retry::Retryable;

/// Result type alias for topology operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Debug, Error)]
pub enum NetworkError {
    /// A network with the workload's name exists with another configuration.
    #[error("network {name} already exists with a different configuration ({found})")]
    TopologyConflict { name: String, found: String },

    /// Connectivity could not be established within the retry budget.
    #[error("network {network} unavailable after {attempts} attempts: {reason}")]
    NetworkUnavailable {
        network: String,
        attempts: u32,
        reason: String,
    },

    #[error("network-control service not yet attached to {0}")]
    ControlNotAttached(String),

    #[error("network-control container has not been identified")]
    ControlUnidentified,

    #[error("service {0} is not attached to any network")]
    Unattached(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl Retryable for NetworkError {
    fn is_retryable(&self) -> bool {
        match self {
            NetworkError::ControlNotAttached(_) => true,
            NetworkError::Backend(e) => e.is_retryable(),
            NetworkError::Client(e) => e.is_retryable(),
            _ => false,
        }
    }
}
