//! Engine assembly: collaborators, root CA and SLA store from configuration.

use std::sync::Arc;

use anyhow::{Context, bail};
use databox_backend::{ContainerBackend, DockerBackend, MemoryBackend, NetworkConfig};
use databox_client::{
    ApiClient, ArbiterClient, NetworkControl, NetworkControlClient, PolicyEngine,
    RecordingNetworkControl, RecordingPolicyEngine, load_api_key, tls_config_from_pem,
};
use databox_credentials::{CertificateMinter, RootCa};
use databox_lifecycle::{EngineContext, EngineSettings};
use databox_state::StateStore;
use tracing::{info, warn};

use crate::config::{BackendKind, CmConfig};

/// Load the root CA, or generate an ephemeral one in development mode when
/// the files are missing.
pub fn load_root_ca(config: &CmConfig) -> anyhow::Result<RootCa> {
    let tls = &config.tls;
    if tls.root_cert.exists() && tls.root_key.exists() {
        return RootCa::from_files(&tls.root_cert, &tls.root_key);
    }
    if !config.engine.dev {
        bail!(
            "root CA not found at {} / {}",
            tls.root_cert.display(),
            tls.root_key.display()
        );
    }
    warn!("no root CA on disk, generating an ephemeral one");
    RootCa::generate("Databox Development Root")
}

/// Build the engine context for the configured backend.
///
/// The `memory` backend runs entirely in-process: the simulator is seeded
/// with the network-control and orchestrator containers, and the policy
/// engine and network-control service are in-process recorders.
pub fn build_context(
    config: &CmConfig,
    root_ca: RootCa,
    store: StateStore,
) -> anyhow::Result<EngineContext> {
    let settings = config.engine_settings();
    let minter: Arc<dyn CertificateMinter> = Arc::new(root_ca);

    let (backend, policy, network_control): (
        Arc<dyn ContainerBackend>,
        Arc<dyn PolicyEngine>,
        Arc<dyn NetworkControl>,
    ) = match config.backend.kind {
        BackendKind::Docker => {
            let tls = tls_config_from_pem(minter.root_certificate_pem().as_bytes())?;
            let arbiter_key = load_api_key(&config.arbiter.key_file)?;
            let arbiter = ApiClient::new(&config.arbiter.endpoint, arbiter_key, Some(tls.clone()))
                .context("arbiter client")?;
            let netctl_key = load_api_key(&config.network_control.key_file)?;
            let netctl = ApiClient::new(&config.network_control.endpoint, netctl_key, Some(tls))
                .context("network-control client")?;
            info!(
                socket = %config.backend.socket.display(),
                arbiter = %arbiter.endpoint(),
                network_control = %netctl.endpoint(),
                "using docker backend"
            );
            (
                Arc::new(DockerBackend::new(&config.backend.socket)),
                Arc::new(ArbiterClient::new(arbiter)),
                Arc::new(NetworkControlClient::new(netctl)),
            )
        }
        BackendKind::Memory => {
            info!("using in-memory backend");
            (
                Arc::new(seeded_memory_backend(&settings)?),
                Arc::new(RecordingPolicyEngine::new()),
                Arc::new(RecordingNetworkControl::new()),
            )
        }
    };

    Ok(EngineContext {
        backend,
        policy,
        network_control,
        minter,
        store,
        settings,
    })
}

fn seeded_memory_backend(settings: &EngineSettings) -> anyhow::Result<MemoryBackend> {
    let topology = &settings.topology;
    let backend = MemoryBackend::new();
    backend.seed_container(&topology.control_container, &[]);
    let own = backend.seed_container(&topology.orchestrator_container, &[]);
    backend.seed_network(&NetworkConfig::overlay(&topology.system_network, false))?;
    backend.seed_connection(&topology.system_network, &own)?;
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use databox_lifecycle::Orchestrator;
    use databox_manifest::Sla;

    fn memory_config(dir: &std::path::Path) -> CmConfig {
        let mut config = CmConfig::default();
        config.backend.kind = BackendKind::Memory;
        config.state.data_dir = dir.to_path_buf();
        config.tls.root_cert = dir.join("absent.crt");
        config.tls.root_key = dir.join("absent.key");
        config.retry.attach_delay_ms = 1;
        config.retry.removal_delay_ms = 1;
        config
    }

    #[test]
    fn missing_root_ca_is_fatal_outside_dev() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config(dir.path());
        assert!(load_root_ca(&config).is_err());

        config.engine.dev = true;
        assert!(load_root_ca(&config).is_ok());
    }

    #[test]
    fn root_ca_is_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = memory_config(dir.path());
        let generated = RootCa::generate("Databox Root").unwrap();
        std::fs::write(&config.tls.root_cert, generated.root_certificate_pem()).unwrap();
        std::fs::write(&config.tls.root_key, generated.key_pem()).unwrap();

        let loaded = load_root_ca(&config).unwrap();
        assert!(loaded.mint("weather").is_ok());
    }

    #[test]
    fn docker_mode_needs_api_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config(dir.path());
        config.backend.kind = BackendKind::Docker;
        config.arbiter.key_file = dir.path().join("missing-key");

        let ca = RootCa::generate("Databox Root").unwrap();
        let store = StateStore::open_in_memory().unwrap();
        assert!(build_context(&config, ca, store).is_err());
    }

    #[tokio::test]
    async fn memory_engine_bootstraps_and_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = memory_config(dir.path());
        let sla: Sla = serde_json::from_value(serde_json::json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": "store-json" }
        }))
        .unwrap();

        {
            let store = StateStore::open(&config.state.db_path()).unwrap();
            let ca = RootCa::generate("Databox Root").unwrap();
            let engine = Orchestrator::new(build_context(&config, ca, store).unwrap());
            let boot = engine.bootstrap().await.unwrap();
            assert_eq!(boot.control_service, "databox-network");
            assert_eq!(boot.privileged_ip.as_deref(), Some("10.0.1.2"));
            engine.install(sla).await.unwrap();
        }

        let store = StateStore::open(&config.state.db_path()).unwrap();
        let ca = RootCa::generate("Databox Root").unwrap();
        let engine = Orchestrator::new(build_context(&config, ca, store).unwrap());
        engine.bootstrap().await.unwrap();
        let restored = engine.restore_persisted().await.unwrap();

        assert_eq!(restored.restored.len(), 1);
        assert_eq!(
            restored.restored[0].services,
            vec!["weather", "weather-store-json"]
        );
    }
}
