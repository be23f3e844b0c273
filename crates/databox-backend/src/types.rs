//! Backend-neutral views of services, tasks, containers, secrets and networks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label filter: `key` present, or `key=value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    pub key: String,
    pub value: Option<String>,
}

impl LabelSelector {
    pub fn present(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match (&self.value, labels.get(&self.key)) {
            (None, found) => found.is_some(),
            (Some(want), Some(have)) => want == have,
            (Some(_), None) => false,
        }
    }

    /// Render in the `key` / `key=value` filter syntax.
    pub fn to_filter(&self) -> String {
        match &self.value {
            Some(value) => format!("{}={}", self.key, value),
            None => self.key.clone(),
        }
    }
}

/// True when every selector matches.
pub fn matches_all(selectors: &[LabelSelector], labels: &BTreeMap<String, String>) -> bool {
    selectors.iter().all(|s| s.matches(labels))
}

/// Container listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    /// Substring of the container name.
    pub name: Option<String>,
    pub labels: Vec<LabelSelector>,
}

impl ContainerFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            labels: Vec::new(),
        }
    }

    pub fn by_label(selector: LabelSelector) -> Self {
        Self {
            name: None,
            labels: vec![selector],
        }
    }

    pub fn matches(&self, container: &ContainerInfo) -> bool {
        self.name
            .as_deref()
            .is_none_or(|name| container.name.contains(name))
            && matches_all(&self.labels, &container.labels)
    }
}

// ── Networks ───────────────────────────────────────────────────────

/// Requested network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub driver: String,
    pub internal: bool,
    pub attachable: bool,
}

impl NetworkConfig {
    /// Attachable overlay network.
    pub fn overlay(name: impl Into<String>, internal: bool) -> Self {
        Self {
            name: name.into(),
            driver: "overlay".to_string(),
            internal,
            attachable: true,
        }
    }

    /// Whether an existing network was created with this configuration.
    pub fn is_satisfied_by(&self, network: &NetworkInfo) -> bool {
        network.driver == self.driver
            && network.internal == self.internal
            && network.attachable == self.attachable
    }
}

/// A container endpoint on a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMember {
    pub container_id: String,
    /// Container name without the leading `/`.
    pub name: String,
    /// Address in CIDR form, e.g. `10.0.1.3/24`.
    pub ipv4_address: String,
}

impl NetworkMember {
    /// Address with the prefix length stripped.
    pub fn ip(&self) -> &str {
        strip_cidr(&self.ipv4_address)
    }
}

/// `10.0.1.3/24` → `10.0.1.3`.
pub fn strip_cidr(address: &str) -> &str {
    address.split('/').next().unwrap_or(address)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub internal: bool,
    pub attachable: bool,
    pub members: Vec<NetworkMember>,
}

// ── Secrets ────────────────────────────────────────────────────────

/// A secret to create. `data` is the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretInfo {
    pub id: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

// ── Services, tasks, containers ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    /// Attached network targets (names or ids).
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub service_id: String,
    pub slot: u64,
    pub state: String,
    pub desired_state: String,
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    /// Name without the leading `/`.
    pub name: String,
    pub image: String,
    pub state: String,
    pub labels: BTreeMap<String, String>,
    /// Network name → IP address.
    pub networks: BTreeMap<String, String>,
}
