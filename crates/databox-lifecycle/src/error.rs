use databox_backend::BackendError;
use databox_credentials::CredentialError;
use databox_manifest::ManifestError;
use databox_network::NetworkError;
use databox_state::StateError;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::phase::WorkloadPhase;

/// Errors returned by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("workload {0} is already installed")]
    AlreadyInstalled(String),

    #[error("workload {name} is busy ({phase})")]
    Busy { name: String, phase: WorkloadPhase },

    #[error("workload {0} is not installed")]
    NotInstalled(String),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// A sub-step that failed after resources became visible. Logged and
/// reported, never returned as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    #[error("backend submission for {service} failed: {reason}")]
    BackendSubmission { service: String, reason: String },

    #[error("policy push ({what}) failed: {reason}")]
    PolicyPush { what: String, reason: String },

    #[error("teardown of {service} failed: {reason}")]
    Teardown { service: String, reason: String },

    #[error("persisting manifest of {workload} failed: {reason}")]
    Persist { workload: String, reason: String },
}

impl StepFailure {
    pub fn log(&self, workload: &str) {
        warn!(%workload, error = %self, "lifecycle step failed");
    }
}
