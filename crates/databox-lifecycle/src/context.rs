//! The engine context: every collaborator and setting, built once at
//! startup and handed to the orchestrator.

use std::sync::Arc;

use databox_backend::ContainerBackend;
use databox_client::{NetworkControl, PolicyEngine};
use databox_credentials::{CertificateMinter, CredentialSettings};
use databox_manifest::CompilerSettings;
use databox_network::TopologySettings;
use databox_permissions::PermissionContext;
use databox_state::StateStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub compiler: CompilerSettings,
    pub topology: TopologySettings,
    pub credentials: CredentialSettings,
    pub permissions: PermissionContext,
}

#[derive(Clone)]
pub struct EngineContext {
    pub backend: Arc<dyn ContainerBackend>,
    pub policy: Arc<dyn PolicyEngine>,
    pub network_control: Arc<dyn NetworkControl>,
    pub minter: Arc<dyn CertificateMinter>,
    pub store: StateStore,
    pub settings: EngineSettings,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
