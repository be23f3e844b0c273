//! In-process swarm simulator.
//!
//! Models just enough of a swarm-mode engine for the orchestrator: each
//! service runs one task whose container joins the service's networks with
//! an allocated address, force-removing a task container makes the service
//! relaunch a replacement, networks refuse removal while they have members,
//! and secrets are labeled blobs.
//!
//! Every call is appended to a log (for ordering assertions) and failures can
//! be injected per operation and target.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use databox_manifest::{LABEL_SWARM_SERVICE, ServiceSpec};
use tracing::debug;

use crate::backend::{BackendFuture, ContainerBackend};
use crate::error::{BackendError, BackendResult};
use crate::types::{
    ContainerFilter, ContainerInfo, LabelSelector, NetworkConfig, NetworkInfo, NetworkMember,
    SecretInfo, SecretSpec, ServiceInfo, TaskInfo, matches_all,
};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub op: &'static str,
    pub target: String,
}

impl fmt::Display for BackendCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.target)
    }
}

#[derive(Debug)]
struct Failure {
    op: &'static str,
    target: Option<String>,
    remaining: u32,
}

#[derive(Debug)]
struct Service {
    id: String,
    spec: ServiceSpec,
}

#[derive(Debug)]
struct Task {
    info: TaskInfo,
    service_name: String,
}

#[derive(Debug)]
struct Secret {
    info: SecretInfo,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Network {
    info: NetworkInfo,
    subnet: u16,
    next_host: u16,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    next_subnet: u16,
    services: BTreeMap<String, Service>,
    tasks: Vec<Task>,
    containers: BTreeMap<String, ContainerInfo>,
    secrets: BTreeMap<String, Secret>,
    networks: BTreeMap<String, Network>,
    calls: Vec<BackendCall>,
    failures: Vec<Failure>,
}

/// In-memory [`ContainerBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call, apply injected failures, then run `f`.
    fn run<T>(
        &self,
        op: &'static str,
        target: &str,
        f: impl FnOnce(&mut State) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut state = self.lock();
        state.calls.push(BackendCall {
            op,
            target: target.to_string(),
        });
        if state.take_failure(op, target) {
            debug!(op, target, "injected backend failure");
            return Err(BackendError::Unavailable(format!("injected failure: {op} {target}")));
        }
        f(&mut *state)
    }

    // ── Test and bootstrap helpers ─────────────────────────────────

    /// Make the next `times` calls of `op` (optionally only on `target`) fail.
    pub fn fail(&self, op: &'static str, target: Option<&str>, times: u32) {
        self.lock().failures.push(Failure {
            op,
            target: target.map(str::to_string),
            remaining: times,
        });
    }

    /// Make every call of `op` (optionally only on `target`) fail.
    pub fn fail_always(&self, op: &'static str, target: Option<&str>) {
        self.fail(op, target, u32::MAX);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Recorded calls of one operation, as targets.
    pub fn calls_of(&self, op: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .map(|call| call.target.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Start a standalone container (not owned by a service).
    pub fn seed_container(&self, name: &str, labels: &[(&str, &str)]) -> String {
        let mut state = self.lock();
        let id = state.new_id("container");
        state.containers.insert(
            id.clone(),
            ContainerInfo {
                id: id.clone(),
                name: name.to_string(),
                image: format!("{name}:latest"),
                state: "running".to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                networks: BTreeMap::new(),
            },
        );
        id
    }

    /// Create a network without recording a call.
    pub fn seed_network(&self, config: &NetworkConfig) -> BackendResult<String> {
        self.lock().create_network(config)
    }

    /// Attach a container without recording a call. Returns its address.
    pub fn seed_connection(&self, network: &str, container: &str) -> BackendResult<String> {
        self.lock().connect(network, container)
    }

    /// Create a secret without recording a call.
    pub fn seed_secret(&self, name: &str) -> BackendResult<String> {
        self.lock().create_secret(&SecretSpec {
            name: name.to_string(),
            labels: BTreeMap::new(),
            data: Vec::new(),
        })
    }

    pub fn service_spec(&self, name: &str) -> Option<ServiceSpec> {
        self.lock().services.get(name).map(|svc| svc.spec.clone())
    }

    pub fn service_names(&self) -> Vec<String> {
        self.lock().services.keys().cloned().collect()
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.lock().secrets.keys().cloned().collect()
    }

    pub fn secret_data(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().secrets.get(name).map(|s| s.data.clone())
    }

    pub fn network_names(&self) -> Vec<String> {
        self.lock().networks.keys().cloned().collect()
    }

    pub fn network_members(&self, name: &str) -> Vec<String> {
        self.lock()
            .networks
            .get(name)
            .map(|net| net.info.members.iter().map(|m| m.name.clone()).collect())
            .unwrap_or_default()
    }
}

impl State {
    fn new_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{:04}", self.next_id)
    }

    fn take_failure(&mut self, op: &str, target: &str) -> bool {
        let hit = self.failures.iter_mut().find(|f| {
            f.op == op && f.remaining > 0 && f.target.as_deref().is_none_or(|t| t == target)
        });
        match hit {
            Some(failure) => {
                if failure.remaining != u32::MAX {
                    failure.remaining -= 1;
                }
                true
            }
            None => false,
        }
    }

    fn service_name(&self, service: &str) -> Option<String> {
        if self.services.contains_key(service) {
            return Some(service.to_string());
        }
        self.services
            .values()
            .find(|svc| svc.id == service)
            .map(|svc| svc.spec.name.clone())
    }

    fn network_name(&self, network: &str) -> Option<String> {
        if self.networks.contains_key(network) {
            return Some(network.to_string());
        }
        self.networks
            .values()
            .find(|net| net.info.id == network)
            .map(|net| net.info.name.clone())
    }

    fn container_id(&self, container: &str) -> Option<String> {
        if self.containers.contains_key(container) {
            return Some(container.to_string());
        }
        self.containers
            .values()
            .find(|c| c.name == container)
            .map(|c| c.id.clone())
    }

    fn secret_name(&self, secret: &str) -> Option<String> {
        if self.secrets.contains_key(secret) {
            return Some(secret.to_string());
        }
        self.secrets
            .values()
            .find(|s| s.info.id == secret)
            .map(|s| s.info.name.clone())
    }

    fn service_info(&self, svc: &Service) -> ServiceInfo {
        ServiceInfo {
            id: svc.id.clone(),
            name: svc.spec.name.clone(),
            image: svc.spec.image.clone(),
            labels: svc.spec.labels.clone(),
            networks: svc.spec.networks.clone(),
        }
    }

    // ── Services ───────────────────────────────────────────────────

    fn create_service(&mut self, spec: &ServiceSpec) -> BackendResult<String> {
        if self.services.contains_key(&spec.name) {
            return Err(BackendError::conflict("service", &spec.name));
        }
        if let Some(missing) = spec.networks.iter().find(|n| self.network_name(n).is_none()) {
            return Err(BackendError::not_found("network", missing));
        }
        if let Some(missing) = spec
            .secrets
            .iter()
            .find(|s| self.secret_name(&s.secret_id).is_none())
        {
            return Err(BackendError::not_found("secret", &missing.secret_name));
        }

        let id = self.new_id("service");
        self.services.insert(
            spec.name.clone(),
            Service {
                id: id.clone(),
                spec: spec.clone(),
            },
        );
        for slot in 1..=spec.replicas {
            self.spawn_task(&spec.name, slot)?;
        }
        Ok(id)
    }

    fn spawn_task(&mut self, service_name: &str, slot: u64) -> BackendResult<()> {
        let Some(svc) = self.services.get(service_name) else {
            return Err(BackendError::not_found("service", service_name));
        };
        let service_id = svc.id.clone();
        let image = svc.spec.image.clone();
        let networks = svc.spec.networks.clone();
        let mut labels = svc.spec.labels.clone();
        labels.insert(LABEL_SWARM_SERVICE.to_string(), service_name.to_string());

        let task_id = self.new_id("task");
        let container_id = self.new_id("container");
        self.containers.insert(
            container_id.clone(),
            ContainerInfo {
                id: container_id.clone(),
                name: format!("{service_name}.{slot}.{task_id}"),
                image,
                state: "running".to_string(),
                labels,
                networks: BTreeMap::new(),
            },
        );
        for network in &networks {
            self.connect(network, &container_id)?;
        }
        self.tasks.push(Task {
            info: TaskInfo {
                id: task_id,
                service_id,
                slot,
                state: "running".to_string(),
                desired_state: "running".to_string(),
                container_id: Some(container_id),
            },
            service_name: service_name.to_string(),
        });
        Ok(())
    }

    fn remove_service(&mut self, service: &str) -> BackendResult<()> {
        let name = self
            .service_name(service)
            .ok_or_else(|| BackendError::not_found("service", service))?;
        self.services.remove(&name);
        let (owned, kept): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|t| t.service_name == name);
        self.tasks = kept;
        for task in owned {
            if let Some(id) = task.info.container_id {
                self.drop_container(&id);
            }
        }
        Ok(())
    }

    // ── Containers ─────────────────────────────────────────────────

    fn drop_container(&mut self, id: &str) {
        for net in self.networks.values_mut() {
            net.info.members.retain(|m| m.container_id != id);
        }
        self.containers.remove(id);
    }

    fn remove_container(&mut self, container: &str, force: bool) -> BackendResult<()> {
        let id = self
            .container_id(container)
            .ok_or_else(|| BackendError::not_found("container", container))?;
        let running = self
            .containers
            .get(&id)
            .is_some_and(|c| c.state == "running");
        if running && !force {
            return Err(BackendError::conflict("container", container));
        }
        self.drop_container(&id);

        let owner = self
            .tasks
            .iter_mut()
            .find(|t| t.info.container_id.as_deref() == Some(id.as_str()) && t.info.state == "running");
        if let Some(task) = owner {
            task.info.state = "shutdown".to_string();
            task.info.desired_state = "shutdown".to_string();
            let (service, slot) = (task.service_name.clone(), task.info.slot);
            if self.services.contains_key(&service) {
                self.spawn_task(&service, slot)?;
            }
        }
        Ok(())
    }

    // ── Secrets ────────────────────────────────────────────────────

    fn create_secret(&mut self, spec: &SecretSpec) -> BackendResult<String> {
        if self.secrets.contains_key(&spec.name) {
            return Err(BackendError::conflict("secret", &spec.name));
        }
        let id = self.new_id("secret");
        self.secrets.insert(
            spec.name.clone(),
            Secret {
                info: SecretInfo {
                    id: id.clone(),
                    name: spec.name.clone(),
                    labels: spec.labels.clone(),
                },
                data: spec.data.clone(),
            },
        );
        Ok(id)
    }

    /// Secrets mounted by a service cannot be removed.
    fn remove_secret(&mut self, secret: &str) -> BackendResult<()> {
        let name = self
            .secret_name(secret)
            .ok_or_else(|| BackendError::not_found("secret", secret))?;
        let id = &self.secrets[&name].info.id;
        if let Some(user) = self
            .services
            .values()
            .find(|svc| svc.spec.secrets.iter().any(|m| &m.secret_id == id))
        {
            debug!(secret = %name, service = %user.spec.name, "secret in use");
            return Err(BackendError::conflict("secret", name));
        }
        self.secrets.remove(&name);
        Ok(())
    }

    // ── Networks ───────────────────────────────────────────────────

    fn create_network(&mut self, config: &NetworkConfig) -> BackendResult<String> {
        if self.networks.contains_key(&config.name) {
            return Err(BackendError::conflict("network", &config.name));
        }
        self.next_subnet += 1;
        let id = self.new_id("network");
        self.networks.insert(
            config.name.clone(),
            Network {
                info: NetworkInfo {
                    id: id.clone(),
                    name: config.name.clone(),
                    driver: config.driver.clone(),
                    internal: config.internal,
                    attachable: config.attachable,
                    members: Vec::new(),
                },
                subnet: self.next_subnet,
                next_host: 2,
            },
        );
        Ok(id)
    }

    fn connect(&mut self, network: &str, container: &str) -> BackendResult<String> {
        let net_name = self
            .network_name(network)
            .ok_or_else(|| BackendError::not_found("network", network))?;
        let id = self
            .container_id(container)
            .ok_or_else(|| BackendError::not_found("container", container))?;
        let Some(entry) = self.containers.get_mut(&id) else {
            return Err(BackendError::not_found("container", container));
        };
        let Some(net) = self.networks.get_mut(&net_name) else {
            return Err(BackendError::not_found("network", network));
        };
        if net.info.members.iter().any(|m| m.container_id == id) {
            return Err(BackendError::conflict("endpoint", format!("{container} on {net_name}")));
        }

        let ip = format!("10.0.{}.{}", net.subnet, net.next_host);
        net.next_host += 1;
        net.info.members.push(NetworkMember {
            container_id: id,
            name: entry.name.clone(),
            ipv4_address: format!("{ip}/24"),
        });
        entry.networks.insert(net_name, ip.clone());
        Ok(ip)
    }

    fn disconnect(&mut self, network: &str, container: &str) -> BackendResult<()> {
        let net_name = self
            .network_name(network)
            .ok_or_else(|| BackendError::not_found("network", network))?;
        let id = self
            .container_id(container)
            .ok_or_else(|| BackendError::not_found("container", container))?;
        let Some(net) = self.networks.get_mut(&net_name) else {
            return Err(BackendError::not_found("network", network));
        };
        let before = net.info.members.len();
        net.info.members.retain(|m| m.container_id != id);
        if net.info.members.len() == before {
            return Err(BackendError::not_found(
                "endpoint",
                format!("{container} on {net_name}"),
            ));
        }
        if let Some(entry) = self.containers.get_mut(&id) {
            entry.networks.remove(&net_name);
        }
        Ok(())
    }

    fn remove_network(&mut self, network: &str) -> BackendResult<()> {
        let name = self
            .network_name(network)
            .ok_or_else(|| BackendError::not_found("network", network))?;
        if self
            .networks
            .get(&name)
            .is_some_and(|net| !net.info.members.is_empty())
        {
            return Err(BackendError::conflict("network", format!("{name} has active endpoints")));
        }
        self.networks.remove(&name);
        Ok(())
    }
}

impl ContainerBackend for MemoryBackend {
    fn ping(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move { self.run("ping", "", |_| Ok(())) })
    }

    fn create_service<'a>(&'a self, spec: &'a ServiceSpec) -> BackendFuture<'a, String> {
        Box::pin(async move { self.run("create_service", &spec.name, |s| s.create_service(spec)) })
    }

    fn inspect_service<'a>(&'a self, service: &'a str) -> BackendFuture<'a, ServiceInfo> {
        Box::pin(async move {
            self.run("inspect_service", service, |s| {
                let name = s
                    .service_name(service)
                    .ok_or_else(|| BackendError::not_found("service", service))?;
                s.services
                    .get(&name)
                    .map(|svc| s.service_info(svc))
                    .ok_or_else(|| BackendError::not_found("service", service))
            })
        })
    }

    fn remove_service<'a>(&'a self, service: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move { self.run("remove_service", service, |s| s.remove_service(service)) })
    }

    fn list_services<'a>(
        &'a self,
        labels: &'a [LabelSelector],
    ) -> BackendFuture<'a, Vec<ServiceInfo>> {
        Box::pin(async move {
            let target = labels
                .iter()
                .map(LabelSelector::to_filter)
                .collect::<Vec<_>>()
                .join(",");
            self.run("list_services", &target, |s| {
                Ok(s.services
                    .values()
                    .filter(|svc| matches_all(labels, &svc.spec.labels))
                    .map(|svc| s.service_info(svc))
                    .collect())
            })
        })
    }

    fn list_tasks<'a>(&'a self, service: &'a str) -> BackendFuture<'a, Vec<TaskInfo>> {
        Box::pin(async move {
            self.run("list_tasks", service, |s| {
                Ok(s.tasks
                    .iter()
                    .filter(|t| t.service_name == service || t.info.service_id == service)
                    .map(|t| t.info.clone())
                    .collect())
            })
        })
    }

    fn list_containers<'a>(
        &'a self,
        filter: &'a ContainerFilter,
    ) -> BackendFuture<'a, Vec<ContainerInfo>> {
        Box::pin(async move {
            let target = filter.name.clone().unwrap_or_else(|| {
                filter
                    .labels
                    .iter()
                    .map(LabelSelector::to_filter)
                    .collect::<Vec<_>>()
                    .join(",")
            });
            self.run("list_containers", &target, |s| {
                Ok(s.containers
                    .values()
                    .filter(|c| filter.matches(c))
                    .cloned()
                    .collect())
            })
        })
    }

    fn remove_container<'a>(&'a self, container: &'a str, force: bool) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.run("remove_container", container, |s| {
                s.remove_container(container, force)
            })
        })
    }

    fn create_secret<'a>(&'a self, spec: &'a SecretSpec) -> BackendFuture<'a, String> {
        Box::pin(async move { self.run("create_secret", &spec.name, |s| s.create_secret(spec)) })
    }

    fn inspect_secret<'a>(&'a self, secret: &'a str) -> BackendFuture<'a, SecretInfo> {
        Box::pin(async move {
            self.run("inspect_secret", secret, |s| {
                s.secret_name(secret)
                    .and_then(|name| s.secrets.get(&name))
                    .map(|found| found.info.clone())
                    .ok_or_else(|| BackendError::not_found("secret", secret))
            })
        })
    }

    fn list_secrets<'a>(
        &'a self,
        labels: &'a [LabelSelector],
    ) -> BackendFuture<'a, Vec<SecretInfo>> {
        Box::pin(async move {
            let target = labels
                .iter()
                .map(LabelSelector::to_filter)
                .collect::<Vec<_>>()
                .join(",");
            self.run("list_secrets", &target, |s| {
                Ok(s.secrets
                    .values()
                    .filter(|found| matches_all(labels, &found.info.labels))
                    .map(|found| found.info.clone())
                    .collect())
            })
        })
    }

    fn remove_secret<'a>(&'a self, secret: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.run("remove_secret", secret, |s| {
                s.remove_secret(secret)
            })
        })
    }

    fn list_networks<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<NetworkInfo>> {
        Box::pin(async move {
            self.run("list_networks", name, |s| {
                Ok(s.networks
                    .get(name)
                    .map(|net| vec![net.info.clone()])
                    .unwrap_or_default())
            })
        })
    }

    fn create_network<'a>(&'a self, config: &'a NetworkConfig) -> BackendFuture<'a, String> {
        Box::pin(async move {
            self.run("create_network", &config.name, |s| s.create_network(config))
        })
    }

    fn inspect_network<'a>(&'a self, network: &'a str) -> BackendFuture<'a, NetworkInfo> {
        Box::pin(async move {
            self.run("inspect_network", network, |s| {
                s.network_name(network)
                    .and_then(|name| s.networks.get(&name))
                    .map(|net| net.info.clone())
                    .ok_or_else(|| BackendError::not_found("network", network))
            })
        })
    }

    fn connect_network<'a>(
        &'a self,
        network: &'a str,
        container: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let target = format!("{network}/{container}");
            self.run("connect_network", &target, |s| {
                s.connect(network, container).map(|_| ())
            })
        })
    }

    fn disconnect_network<'a>(
        &'a self,
        network: &'a str,
        container: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let target = format!("{network}/{container}");
            self.run("disconnect_network", &target, |s| {
                s.disconnect(network, container)
            })
        })
    }

    fn remove_network<'a>(&'a self, network: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move { self.run("remove_network", network, |s| s.remove_network(network)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use databox_manifest::{DataboxType, LABEL_TYPE, SecretMount};

    fn spec(name: &str, network: &str) -> ServiceSpec {
        let mut spec = ServiceSpec::new(name, format!("databoxsystems/{name}:latest"), DataboxType::Driver);
        spec.networks.push(network.to_string());
        spec
    }

    fn backend_with_network(name: &str) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .seed_network(&NetworkConfig::overlay(name, false))
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn service_runs_one_task_on_its_network() {
        let backend = backend_with_network("weather-network");
        backend.create_service(&spec("weather", "weather-network")).await.unwrap();

        let tasks = backend.list_tasks("weather").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, "running");

        let net = backend.inspect_network("weather-network").await.unwrap();
        assert_eq!(net.members.len(), 1);
        assert!(net.members[0].name.starts_with("weather.1."));
        assert_eq!(net.members[0].ip(), "10.0.1.2");
    }

    #[tokio::test]
    async fn duplicate_service_conflicts() {
        let backend = backend_with_network("n");
        backend.create_service(&spec("a", "n")).await.unwrap();
        let err = backend.create_service(&spec("a", "n")).await.unwrap_err();
        assert!(matches!(err, BackendError::Conflict { .. }));
    }

    #[tokio::test]
    async fn missing_network_or_secret_is_rejected() {
        let backend = MemoryBackend::new();
        let err = backend.create_service(&spec("a", "nope")).await.unwrap_err();
        assert!(err.is_not_found());

        let backend = backend_with_network("n");
        let mut with_secret = spec("a", "n");
        with_secret
            .secrets
            .push(SecretMount::owner_only("secret-x", "A_KEY", "ARBITER_TOKEN"));
        assert!(backend.create_service(&with_secret).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn force_removed_task_container_is_replaced() {
        let backend = backend_with_network("n");
        backend.create_service(&spec("a", "n")).await.unwrap();

        let filter = ContainerFilter::by_label(LabelSelector::equals(LABEL_SWARM_SERVICE, "a"));
        let before = backend.list_containers(&filter).await.unwrap();
        assert_eq!(before.len(), 1);
        assert!(backend.remove_container(&before[0].id, false).await.is_err());
        backend.remove_container(&before[0].id, true).await.unwrap();

        let after = backend.list_containers(&filter).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_ne!(after[0].id, before[0].id);

        let tasks = backend.list_tasks("a").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].state, "shutdown");
        assert_eq!(tasks[1].state, "running");
    }

    #[tokio::test]
    async fn removing_service_removes_its_containers() {
        let backend = backend_with_network("n");
        backend.create_service(&spec("a", "n")).await.unwrap();
        backend.remove_service("a").await.unwrap();

        assert!(backend.network_members("n").is_empty());
        assert!(backend.list_tasks("a").await.unwrap().is_empty());
        assert!(backend.remove_service("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn network_with_members_cannot_be_removed() {
        let backend = backend_with_network("n");
        let id = backend.seed_container("databox-network", &[]);
        backend.connect_network("n", "databox-network").await.unwrap();
        assert!(backend.connect_network("n", &id).await.is_err());

        assert!(backend.remove_network("n").await.is_err());
        backend.disconnect_network("n", &id).await.unwrap();
        backend.remove_network("n").await.unwrap();
        assert!(backend.network_names().is_empty());
    }

    #[tokio::test]
    async fn secrets_are_listed_by_label() {
        let backend = MemoryBackend::new();
        let mut labels = BTreeMap::new();
        labels.insert("databox.service.name".to_string(), "weather".to_string());
        backend
            .create_secret(&SecretSpec {
                name: "WEATHER_KEY".to_string(),
                labels,
                data: b"token".to_vec(),
            })
            .await
            .unwrap();
        backend.seed_secret("other").unwrap();

        let found = backend
            .list_secrets(&[LabelSelector::equals("databox.service.name", "weather")])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(backend.secret_data("WEATHER_KEY").unwrap(), b"token");

        backend.remove_secret(&found[0].id).await.unwrap();
        assert_eq!(backend.secret_names(), vec!["other"]);
    }

    #[tokio::test]
    async fn mounted_secret_cannot_be_removed() {
        let backend = backend_with_network("n");
        let id = backend.seed_secret("A_KEY").unwrap();
        let mut with_secret = spec("a", "n");
        with_secret
            .secrets
            .push(SecretMount::owner_only(id.as_str(), "A_KEY", "ARBITER_TOKEN"));
        backend.create_service(&with_secret).await.unwrap();

        let err = backend.remove_secret(&id).await.unwrap_err();
        assert!(matches!(err, BackendError::Conflict { kind: "secret", .. }));
        assert!(backend.remove_secret("A_KEY").await.is_err());
        assert_eq!(backend.secret_names(), vec!["A_KEY"]);

        backend.remove_service("a").await.unwrap();
        backend.remove_secret(&id).await.unwrap();
        assert!(backend.secret_names().is_empty());
    }

    #[tokio::test]
    async fn services_filter_by_type_label() {
        let backend = backend_with_network("n");
        backend.create_service(&spec("a", "n")).await.unwrap();

        let drivers = backend
            .list_services(&[LabelSelector::equals(LABEL_TYPE, "driver")])
            .await
            .unwrap();
        let apps = backend
            .list_services(&[LabelSelector::equals(LABEL_TYPE, "app")])
            .await
            .unwrap();
        assert_eq!(drivers.len(), 1);
        assert!(apps.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_counted_and_logged() {
        let backend = MemoryBackend::new();
        backend.fail("ping", None, 2);

        assert!(backend.ping().await.is_err());
        assert!(backend.ping().await.is_err());
        assert!(backend.ping().await.is_ok());
        assert_eq!(backend.calls_of("ping").len(), 3);

        backend.fail_always("remove_network", Some("n"));
        for _ in 0..5 {
            assert!(backend.remove_network("n").await.is_err());
        }
        assert!(backend.remove_network("m").await.unwrap_err().is_not_found());
    }
}
