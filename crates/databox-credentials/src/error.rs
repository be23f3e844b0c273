use databox_backend::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("cannot mint certificate for {identity}: {reason}")]
    Mint { identity: String, reason: String },

    #[error("cannot generate arbiter token: {0}")]
    Token(String),

    #[error("root CA secret {0} is missing")]
    RootCaMissing(String),

    #[error("cannot encode certificate bundle: {0}")]
    Encode(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type CredentialResult<T> = Result<T, CredentialError>;
