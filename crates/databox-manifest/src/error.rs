//! Manifest error types.

use thiserror::Error;

/// Result type alias for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// A manifest that cannot be compiled into services.
///
/// Every variant is raised before any backend resource exists, so callers
/// can surface it directly.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("missing databox-type in SLA {0}")]
    MissingType(String),

    #[error("unsupported databox-type {kind:?} in SLA {name}")]
    UnsupportedType { name: String, kind: String },

    #[error("invalid workload name: {0:?}")]
    InvalidName(String),

    #[error("catalogue descriptor for datasource {clientid} is not serializable: {reason}")]
    Descriptor { clientid: String, reason: String },
}
