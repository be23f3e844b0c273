//! `databox-cm.toml` configuration.
//!
//! Every section and field is optional; missing values take the defaults
//! below. Command-line flags are applied on top with
//! [`CmConfig::apply_overrides`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use databox_backend::docker::DEFAULT_SOCKET;
use databox_credentials::CredentialSettings;
use databox_credentials::provision::DEFAULT_ROOT_CA_SECRET;
use databox_lifecycle::EngineSettings;
use databox_manifest::{CompilerSettings, ImageSettings};
use databox_network::{RetryPolicy, TopologySettings};
use databox_permissions::PermissionContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CmConfig {
    pub engine: EngineConfig,
    pub arbiter: EndpointConfig,
    pub network_control: NetworkControlConfig,
    pub tls: TlsConfig,
    pub backend: BackendConfig,
    pub state: StateConfig,
    pub api: ApiConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pull `:latest` images and allow an ephemeral root CA.
    pub dev: bool,
    pub version: String,
    pub default_registry: String,
    /// Arbiter endpoint as seen from inside workload networks.
    pub arbiter_endpoint: String,
    pub export_service_endpoint: String,
    /// This process's identity towards stores and the network-control service.
    pub orchestrator: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dev: false,
            version: "latest".to_string(),
            default_registry: "databoxsystems".to_string(),
            arbiter_endpoint: "https://arbiter:8080".to_string(),
            export_service_endpoint: "https://export-service:8080".to_string(),
            orchestrator: "container-manager".to_string(),
        }
    }
}

/// A collaborator reached over HTTPS with an API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub endpoint: String,
    pub key_file: PathBuf,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://arbiter:8080".to_string(),
            key_file: PathBuf::from("/run/secrets/CM_KEY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkControlConfig {
    pub endpoint: String,
    pub key_file: PathBuf,
    /// Name of the network-control container.
    pub container: String,
    /// Network on which the network-control service sees this process.
    pub system_network: String,
}

impl Default for NetworkControlConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://databox-network:8080".to_string(),
            key_file: PathBuf::from("/run/secrets/CM_KEY"),
            container: "databox-network".to_string(),
            system_network: "databox-system-net".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub root_cert: PathBuf,
    pub root_key: PathBuf,
    /// Backend secret holding the root certificate for workloads.
    pub root_ca_secret: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            root_cert: PathBuf::from("/run/secrets/DATABOX_ROOT_CA"),
            root_key: PathBuf::from("/run/secrets/DATABOX_ROOT_CA_KEY"),
            root_ca_secret: DEFAULT_ROOT_CA_SECRET.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Docker Engine in swarm mode.
    #[default]
    Docker,
    /// In-process simulator with in-process collaborators. Nothing leaves
    /// the process.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub socket: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Docker,
            socket: PathBuf::from(DEFAULT_SOCKET),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/databox"),
        }
    }
}

impl StateConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("databox-cm.redb")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8989 }
    }
}

/// Attempts and delays of the bounded retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Control-service attachment, peer connection and privileged
    /// registration.
    pub attach_attempts: u32,
    pub attach_delay_ms: u64,
    /// Network removal at teardown.
    pub removal_attempts: u32,
    pub removal_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attach_attempts: 3,
            attach_delay_ms: 1000,
            removal_attempts: 3,
            removal_delay_ms: 1500,
        }
    }
}

impl RetryConfig {
    fn attach(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.attach_attempts,
            Duration::from_millis(self.attach_delay_ms),
        )
    }

    fn removal(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.removal_attempts,
            Duration::from_millis(self.removal_delay_ms),
        )
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub dev: bool,
    pub version: Option<String>,
}

impl CmConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: CmConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.port {
            self.api.port = port;
        }
        if let Some(dir) = overrides.data_dir {
            self.state.data_dir = dir;
        }
        if overrides.dev {
            self.engine.dev = true;
        }
        if let Some(version) = overrides.version {
            self.engine.version = version;
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let engine = &self.engine;
        EngineSettings {
            compiler: CompilerSettings {
                images: ImageSettings {
                    dev_mode: engine.dev,
                    version: engine.version.clone(),
                    default_registry: engine.default_registry.clone(),
                },
                arbiter_endpoint: engine.arbiter_endpoint.clone(),
                export_service_endpoint: engine.export_service_endpoint.clone(),
            },
            topology: TopologySettings {
                control_container: self.network_control.container.clone(),
                orchestrator_container: engine.orchestrator.clone(),
                system_network: self.network_control.system_network.clone(),
                attach_retry: self.retry.attach(),
                connect_retry: self.retry.attach(),
                removal_retry: self.retry.removal(),
                privileged_retry: self.retry.attach(),
            },
            credentials: CredentialSettings {
                root_ca_secret: self.tls.root_ca_secret.clone(),
            },
            permissions: PermissionContext::new(
                engine.orchestrator.as_str(),
                &engine.export_service_endpoint,
            ),
        }
    }
}
