//! Client error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for collaborator calls.
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("tls configuration error: {0}")]
    Tls(String),

    #[error("cannot read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{path} returned {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("cannot encode request body: {0}")]
    Encode(String),

    #[error("{0}")]
    Rejected(String),
}
