//! Backend service specifications derived from a manifest.
//!
//! A `ServiceSpec` is built fresh on every install and never mutated after
//! submission; updates go through uninstall + install.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sla::DataboxType;

/// Label carrying the workload type on every service.
pub const LABEL_TYPE: &str = "databox.type";
/// Label carrying the owning workload on every secret.
pub const LABEL_SERVICE_NAME: &str = "databox.service.name";
/// Label the backend puts on task containers.
pub const LABEL_SWARM_SERVICE: &str = "com.docker.swarm.service.name";
/// Placement constraint pinning every workload to a manager node.
pub const MANAGER_CONSTRAINT: &str = "node.role == manager";

/// A single `KEY=VALUE` environment entry. Order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Render as `KEY=VALUE`.
    pub fn to_assignment(&self) -> String {
        format!("{}={}", self.key, self.value)
    }

    /// Parse a `KEY=VALUE` assignment; the value may itself contain `=`.
    pub fn parse(assignment: &str) -> Option<Self> {
        let (key, value) = assignment.split_once('=')?;
        Some(Self::new(key, value))
    }
}

/// A secret mounted as a file into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMount {
    pub secret_id: String,
    pub secret_name: String,
    /// File name under `/run/secrets/`.
    pub file_name: String,
    pub uid: String,
    pub gid: String,
    pub mode: u32,
}

impl SecretMount {
    /// Root-owned, owner-read-only file.
    pub const OWNER_READ_ONLY: u32 = 0o400;

    pub fn owner_only(
        secret_id: impl Into<String>,
        secret_name: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_name: secret_name.into(),
            file_name: file_name.into(),
            uid: "0".to_string(),
            gid: "0".to_string(),
            mode: Self::OWNER_READ_ONLY,
        }
    }
}

/// A named volume mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
}

/// How the backend exposes the service's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    Vip,
    #[default]
    Dnsrr,
}

impl EndpointMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointMode::Vip => "vip",
            EndpointMode::Dnsrr => "dnsrr",
        }
    }
}

/// Everything the backend needs to run one workload container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub image: String,
    pub env: Vec<EnvVar>,
    pub secrets: Vec<SecretMount>,
    pub mounts: Vec<VolumeMount>,
    /// Network names the service attaches to.
    pub networks: Vec<String>,
    /// DNS resolvers handed to the container.
    pub dns_nameservers: Vec<String>,
    pub placement_constraints: Vec<String>,
    pub replicas: u64,
    pub endpoint_mode: EndpointMode,
}

impl ServiceSpec {
    /// Start a manager-pinned, single-replica, dnsrr spec.
    pub fn new(name: impl Into<String>, image: impl Into<String>, kind: DataboxType) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_TYPE.to_string(), kind.as_str().to_string());
        Self {
            name: name.into(),
            labels,
            image: image.into(),
            env: Vec::new(),
            secrets: Vec::new(),
            mounts: Vec::new(),
            networks: Vec::new(),
            dns_nameservers: Vec::new(),
            placement_constraints: vec![MANAGER_CONSTRAINT.to_string()],
            replicas: 1,
            endpoint_mode: EndpointMode::Dnsrr,
        }
    }

    /// Append an environment variable.
    pub fn push_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.push(EnvVar::new(key, value));
    }

    /// First value for `key`, if any.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|var| var.key == key)
            .map(|var| var.value.as_str())
    }

    /// Workload type from the `databox.type` label.
    pub fn workload_type(&self) -> Option<DataboxType> {
        self.labels.get(LABEL_TYPE)?.parse().ok()
    }
}
