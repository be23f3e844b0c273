//! TopologyManager — reserve, connect and tear down workload networks.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use databox_backend::{ContainerBackend, ContainerFilter, NetworkConfig, strip_cidr};
use databox_client::NetworkControl;
use databox_manifest::{CompiledWorkload, DataboxType, NetworkTopology, Sla};
use futures_util::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, NetworkResult};
use crate::peers::{peers_of_env, to_service_name, url_host};
use crate::retry::{RetryError, RetryPolicy};

/// Names and retry budgets used by the topology manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySettings {
    /// Name of the network-control container.
    pub control_container: String,
    /// Name of the orchestrator's own container.
    pub orchestrator_container: String,
    /// Network on which the orchestrator is reachable by the control service.
    pub system_network: String,
    pub attach_retry: RetryPolicy,
    pub connect_retry: RetryPolicy,
    pub removal_retry: RetryPolicy,
    pub privileged_retry: RetryPolicy,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            control_container: "databox-network".to_string(),
            orchestrator_container: "container-manager".to_string(),
            system_network: "databox-system-net".to_string(),
            attach_retry: RetryPolicy::default(),
            connect_retry: RetryPolicy::default(),
            removal_retry: RetryPolicy::fixed(3, Duration::from_millis(1500)),
            privileged_retry: RetryPolicy::default(),
        }
    }
}

/// Where a running service is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNetwork {
    pub service: String,
    pub network: String,
    /// The service's own address on `network`, without prefix length.
    pub ip: Option<String>,
}

/// What teardown did with the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "lowercase")]
pub enum TeardownOutcome {
    /// No workload was left; the network is gone.
    Removed,
    /// Other workloads still use the network.
    Retained(Vec<String>),
    /// A step failed; the network may still exist.
    Failed(String),
}

impl fmt::Display for TeardownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownOutcome::Removed => f.write_str("removed"),
            TeardownOutcome::Retained(others) => write!(f, "retained for {}", others.join(", ")),
            TeardownOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Reconciles per-workload networks against the backend and the
/// network-control service.
pub struct TopologyManager {
    backend: Arc<dyn ContainerBackend>,
    control: Arc<dyn NetworkControl>,
    settings: TopologySettings,
    control_name: OnceLock<String>,
}

impl TopologyManager {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        control: Arc<dyn NetworkControl>,
        settings: TopologySettings,
    ) -> Self {
        Self {
            backend,
            control,
            settings,
            control_name: OnceLock::new(),
        }
    }

    pub fn settings(&self) -> &TopologySettings {
        &self.settings
    }

    // ── Bootstrap ──────────────────────────────────────────────────

    /// Find the network-control container and remember its name.
    ///
    /// Set once: later calls return the name found first.
    pub async fn identify_control_service(&self) -> NetworkResult<&str> {
        if let Some(name) = self.control_name.get() {
            return Ok(name.as_str());
        }
        let filter = ContainerFilter::by_name(&self.settings.control_container);
        let found = self.backend.list_containers(&filter).await?;
        let Some(first) = found.first() else {
            warn!(container = %self.settings.control_container, "network-control container not found");
            return Err(NetworkError::ControlUnidentified);
        };
        let name = self.control_name.get_or_init(|| first.name.clone());
        info!(control = %name, "network-control container identified");
        Ok(name.as_str())
    }

    /// The identified control container name.
    pub fn control_name(&self) -> NetworkResult<&str> {
        self.control_name
            .get()
            .map(String::as_str)
            .ok_or(NetworkError::ControlUnidentified)
    }

    /// Tell the network-control service that the orchestrator's own address
    /// on the system network is privileged.
    ///
    /// Returns the registered address, or `None` when the orchestrator
    /// container or its address could not be found.
    pub async fn register_privileged(&self) -> NetworkResult<Option<String>> {
        let filter = ContainerFilter::by_name(&self.settings.orchestrator_container);
        let found = self.backend.list_containers(&filter).await?;
        let Some(own) = found.first() else {
            warn!(container = %self.settings.orchestrator_container, "orchestrator container not found");
            return Ok(None);
        };
        if found.len() > 1 {
            warn!(count = found.len(), "several orchestrator containers found, using the first");
        }
        let Some(ip) = own.networks.get(&self.settings.system_network).cloned() else {
            warn!(network = %self.settings.system_network, "orchestrator has no address on the system network");
            return Ok(None);
        };

        self.settings
            .privileged_retry
            .run("privileged", |_| self.control.privileged(&ip))
            .await
            .map_err(|e| NetworkError::from(e.into_inner()))?;
        info!(%ip, "orchestrator registered as privileged");
        Ok(Some(ip))
    }

    // ── Install path ───────────────────────────────────────────────

    /// Network configuration for a workload: drivers may reach the outside
    /// world, everything else is internal.
    pub fn network_config(sla: &Sla) -> NetworkConfig {
        let internal = !matches!(sla.workload_type(), Ok(DataboxType::Driver));
        NetworkConfig::overlay(sla.network_name(), internal)
    }

    /// Ensure the workload network exists with the control service attached
    /// and return it with the control service's address as DNS resolver.
    pub async fn reserve(&self, sla: &Sla) -> NetworkResult<NetworkTopology> {
        let config = Self::network_config(sla);
        self.ensure_network(&config).await?;
        let control = self.control_name()?;

        let dns_ip = self
            .settings
            .attach_retry
            .run("attach control service", |_| self.attach_control(&config.name, control))
            .await
            .map_err(|e| unavailable(&config.name, e))?;

        debug!(network = %config.name, %dns_ip, "network reserved");
        Ok(NetworkTopology {
            network_name: config.name,
            dns_ip,
        })
    }

    async fn ensure_network(&self, config: &NetworkConfig) -> NetworkResult<()> {
        let existing = self.backend.list_networks(&config.name).await?;
        if existing.is_empty() {
            info!(network = %config.name, internal = config.internal, "creating network");
            self.backend.create_network(config).await?;
            return Ok(());
        }
        if existing.iter().any(|net| config.is_satisfied_by(net)) {
            debug!(network = %config.name, "using existing network");
            return Ok(());
        }
        let found = &existing[0];
        Err(NetworkError::TopologyConflict {
            name: config.name.clone(),
            found: format!(
                "driver={} internal={} attachable={}",
                found.driver, found.internal, found.attachable
            ),
        })
    }

    /// One attach round: return the control address if present, otherwise
    /// connect the control container and look again.
    async fn attach_control(&self, network: &str, control: &str) -> NetworkResult<String> {
        if let Some(ip) = self.control_address(network, control).await? {
            return Ok(ip);
        }
        if let Err(e) = self.backend.connect_network(network, control).await {
            debug!(%control, %network, error = %e, "attach failed");
            return Err(NetworkError::ControlNotAttached(network.to_string()));
        }
        info!(%control, %network, "network-control attached");
        self.control_address(network, control)
            .await?
            .ok_or_else(|| NetworkError::ControlNotAttached(network.to_string()))
    }

    async fn control_address(&self, network: &str, control: &str) -> NetworkResult<Option<String>> {
        let info = self.backend.inspect_network(network).await?;
        Ok(info
            .members
            .iter()
            .find(|m| m.name == control)
            .map(|m| m.ip().to_string()))
    }

    /// Ask the network-control service to let `service` reach `peers`.
    pub async fn connect(&self, service: &str, peers: &[String]) -> NetworkResult<()> {
        if peers.is_empty() {
            return Ok(());
        }
        self.settings
            .connect_retry
            .run("connect peers", |_| async {
                self.control
                    .connect(service, peers)
                    .await
                    .map_err(NetworkError::from)
            })
            .await
            .map_err(|e| unavailable(service, e))?;
        debug!(%service, ?peers, "peers connected");
        Ok(())
    }

    /// Connect the primary and every dependent to the peers named in their
    /// environment, and the primary to its external-whitelist hosts.
    pub async fn connect_workload(
        &self,
        compiled: &CompiledWorkload,
        sla: &Sla,
    ) -> NetworkResult<()> {
        let mut requests: Vec<(String, Vec<String>)> = std::iter::once(&compiled.primary)
            .chain(&compiled.dependents)
            .map(|spec| (spec.name.clone(), peers_of_env(&spec.env)))
            .filter(|(_, peers)| !peers.is_empty())
            .collect();

        let mut external: Vec<String> = Vec::new();
        for host in sla
            .external_whitelist
            .iter()
            .flat_map(|entry| &entry.urls)
            .filter_map(|url| url_host(url))
        {
            if !external.contains(&host) {
                external.push(host);
            }
        }
        if !external.is_empty() {
            info!(service = %compiled.primary.name, ?external, "connecting external hosts");
            requests.push((compiled.primary.name.clone(), external));
        }

        try_join_all(
            requests
                .iter()
                .map(|(service, peers)| self.connect(service, peers)),
        )
        .await?;
        Ok(())
    }

    // ── Uninstall path ─────────────────────────────────────────────

    /// Resolve a running service's network and its address on it.
    pub async fn network_of_service(&self, service: &str) -> NetworkResult<ServiceNetwork> {
        let info = self.backend.inspect_service(service).await?;
        if info.networks.len() != 1 {
            warn!(%service, count = info.networks.len(), "service is not on exactly one network");
        }
        let network = info
            .networks
            .first()
            .cloned()
            .ok_or_else(|| NetworkError::Unattached(service.to_string()))?;

        let net = self.backend.inspect_network(&network).await?;
        let ip = net
            .members
            .iter()
            .find(|m| to_service_name(&m.name) == service)
            .map(|m| m.ip().to_string());

        Ok(ServiceNetwork {
            service: service.to_string(),
            network: net.name,
            ip,
        })
    }

    /// Withdraw a service's address from the network-control plane.
    /// Best-effort; returns whether the withdrawal went through.
    pub async fn release(&self, attachment: &ServiceNetwork) -> bool {
        let Some(ip) = &attachment.ip else {
            debug!(service = %attachment.service, "no address to release");
            return false;
        };
        match self.control.disconnect(&attachment.service, strip_cidr(ip)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(service = %attachment.service, %ip, error = %e, "network-control disconnect failed");
                false
            }
        }
    }

    /// Release the departing workload and remove its network when no
    /// other workload is left on it.
    ///
    /// `departing` lists every service being removed together with the
    /// primary (its dependent stores). Best-effort: failures are logged and
    /// reported in the outcome, never returned.
    pub async fn teardown(
        &self,
        attachment: &ServiceNetwork,
        departing: &[String],
    ) -> TeardownOutcome {
        let network = attachment.network.as_str();
        self.release(attachment).await;

        let control = match self.control_name() {
            Ok(name) => name,
            Err(e) => return TeardownOutcome::Failed(e.to_string()),
        };
        let info = match self.backend.inspect_network(network).await {
            Ok(info) => info,
            Err(e) => {
                warn!(%network, error = %e, "cannot inspect network during teardown");
                return TeardownOutcome::Failed(e.to_string());
            }
        };

        let remaining: Vec<String> = info
            .members
            .iter()
            .filter(|m| {
                let name = to_service_name(&m.name);
                name != attachment.service
                    && name != control
                    && !departing.iter().any(|d| d == name)
            })
            .map(|m| m.name.clone())
            .collect();
        if !remaining.is_empty() {
            for name in &remaining {
                info!(%network, container = %name, "still on the network");
            }
            return TeardownOutcome::Retained(remaining);
        }

        if let Err(e) = self.backend.disconnect_network(network, control).await {
            warn!(%network, error = %e, "cannot detach network-control container");
        }
        match self
            .settings
            .removal_retry
            .run("remove network", |_| self.backend.remove_network(network))
            .await
        {
            Ok(()) => {
                info!(%network, "network removed");
                TeardownOutcome::Removed
            }
            Err(e) => {
                warn!(%network, error = %e, "cannot remove network");
                TeardownOutcome::Failed(e.to_string())
            }
        }
    }
}

fn unavailable(network: &str, e: RetryError<NetworkError>) -> NetworkError {
    match e {
        RetryError::Exhausted { attempts, last } => NetworkError::NetworkUnavailable {
            network: network.to_string(),
            attempts,
            reason: last.to_string(),
        },
        RetryError::Fatal(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use databox_backend::MemoryBackend;
    use databox_client::{NetCall, RecordingNetworkControl};
    use databox_manifest::{CompilerSettings, ManifestCompiler};
    use serde_json::json;

    fn quick() -> TopologySettings {
        let fast = RetryPolicy::fixed(3, Duration::from_millis(1));
        TopologySettings {
            attach_retry: fast,
            connect_retry: fast,
            removal_retry: fast,
            privileged_retry: fast,
            ..Default::default()
        }
    }

    struct Fixture {
        backend: Arc<MemoryBackend>,
        control: Arc<RecordingNetworkControl>,
        manager: TopologyManager,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed_container("databox-network", &[]);
        let control = Arc::new(RecordingNetworkControl::new());
        let manager = TopologyManager::new(backend.clone(), control.clone(), quick());
        manager.identify_control_service().await.unwrap();
        Fixture {
            backend,
            control,
            manager,
        }
    }

    fn sla(value: serde_json::Value) -> Sla {
        serde_json::from_value::<Sla>(value)
            .unwrap()
            .normalized()
            .unwrap()
    }

    fn driver() -> Sla {
        sla(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": "store-json" }
        }))
    }

    #[tokio::test]
    async fn control_identity_is_set_once() {
        let f = fixture().await;
        f.backend.seed_container("databox-network-2", &[]);
        assert_eq!(f.manager.identify_control_service().await.unwrap(), "databox-network");
        assert_eq!(f.manager.control_name().unwrap(), "databox-network");
    }

    #[tokio::test]
    async fn missing_control_container_is_an_error() {
        let manager = TopologyManager::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(RecordingNetworkControl::new()),
            quick(),
        );
        assert!(matches!(
            manager.identify_control_service().await,
            Err(NetworkError::ControlUnidentified)
        ));
    }

    #[tokio::test]
    async fn reserve_creates_network_and_attaches_control() {
        let f = fixture().await;
        let topology = f.manager.reserve(&driver()).await.unwrap();

        assert_eq!(topology.network_name, "weather-network");
        assert_eq!(topology.dns_ip, "10.0.1.2");
        let net = f.backend.inspect_network("weather-network").await.unwrap();
        assert!(!net.internal);
        assert!(net.attachable);
        assert_eq!(f.backend.network_members("weather-network"), vec!["databox-network"]);
    }

    #[tokio::test]
    async fn reserve_is_idempotent() {
        let f = fixture().await;
        let first = f.manager.reserve(&driver()).await.unwrap();
        let second = f.manager.reserve(&driver()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.backend.calls_of("create_network"), vec!["weather-network"]);
        assert_eq!(f.backend.calls_of("connect_network").len(), 1);
    }

    #[tokio::test]
    async fn apps_get_internal_networks() {
        let f = fixture().await;
        let app = sla(json!({ "name": "app-a", "databox-type": "app" }));
        f.manager.reserve(&app).await.unwrap();
        assert!(f.backend.inspect_network("app-a-network").await.unwrap().internal);
    }

    #[tokio::test]
    async fn mismatched_network_is_a_conflict() {
        let f = fixture().await;
        f.backend
            .seed_network(&NetworkConfig::overlay("weather-network", true))
            .unwrap();

        let err = f.manager.reserve(&driver()).await.unwrap_err();
        assert!(matches!(err, NetworkError::TopologyConflict { .. }));
    }

    #[tokio::test]
    async fn attach_failures_exhaust_to_unavailable() {
        let f = fixture().await;
        f.backend.fail_always("connect_network", None);

        let err = f.manager.reserve(&driver()).await.unwrap_err();
        assert!(matches!(err, NetworkError::NetworkUnavailable { attempts: 3, .. }));
        assert_eq!(f.backend.calls_of("inspect_network").len(), 3);
    }

    #[tokio::test]
    async fn transient_attach_failure_is_retried() {
        let f = fixture().await;
        f.backend.fail("connect_network", None, 1);

        let topology = f.manager.reserve(&driver()).await.unwrap();
        assert_eq!(topology.dns_ip, "10.0.1.2");
    }

    #[tokio::test]
    async fn workload_peers_and_external_hosts_are_connected() {
        let f = fixture().await;
        let sla = sla(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": "store-json" },
            "external-whitelist": [
                { "urls": ["https://api.openweathermap.org/data", "https://api.openweathermap.org/x"] }
            ]
        }));
        let topology = f.manager.reserve(&sla).await.unwrap();
        let compiled = ManifestCompiler::new(CompilerSettings::default())
            .compile(&sla, &topology)
            .unwrap();

        f.manager.connect_workload(&compiled, &sla).await.unwrap();

        let mut connections = f.control.connections();
        connections.sort();
        assert_eq!(
            connections,
            vec![
                ("weather".to_string(), vec!["api.openweathermap.org".to_string()]),
                (
                    "weather".to_string(),
                    vec!["arbiter".to_string(), "weather-store-json".to_string()]
                ),
                ("weather-store-json".to_string(), vec!["arbiter".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn connect_exhaustion_is_unavailable() {
        let f = fixture().await;
        f.control
            .fail_when(|c| matches!(c, NetCall::Connect { .. }), u32::MAX);

        let err = f
            .manager
            .connect("weather", &["arbiter".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::NetworkUnavailable { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn privileged_registration_uses_system_network_address() {
        let f = fixture().await;
        f.backend
            .seed_network(&NetworkConfig::overlay("databox-system-net", false))
            .unwrap();
        f.backend.seed_container("container-manager", &[]);
        let ip = f
            .backend
            .seed_connection("databox-system-net", "container-manager")
            .unwrap();

        let registered = f.manager.register_privileged().await.unwrap();
        assert_eq!(registered.as_deref(), Some(ip.as_str()));
        assert_eq!(f.control.calls(), vec![NetCall::Privileged { src_ip: ip }]);
    }

    #[tokio::test]
    async fn privileged_registration_without_orchestrator_is_skipped() {
        let f = fixture().await;
        assert_eq!(f.manager.register_privileged().await.unwrap(), None);
        assert!(f.control.calls().is_empty());
    }

    async fn installed(f: &Fixture, name: &str) -> ServiceNetwork {
        let spec_sla = sla(json!({ "name": name, "databox-type": "driver" }));
        let topology = f.manager.reserve(&spec_sla).await.unwrap();
        let compiled = ManifestCompiler::default()
            .compile(&spec_sla, &topology).unwrap();
        f.backend.create_service(&compiled.primary).await.unwrap();
        f.manager.network_of_service(name).await.unwrap()
    }

    #[tokio::test]
    async fn network_of_service_finds_own_address() {
        let f = fixture().await;
        let attachment = installed(&f, "weather").await;

        assert_eq!(attachment.network, "weather-network");
        assert_eq!(attachment.ip.as_deref(), Some("10.0.1.3"));
    }

    #[tokio::test]
    async fn teardown_removes_empty_network() {
        let f = fixture().await;
        let attachment = installed(&f, "weather").await;
        f.backend.remove_service("weather").await.unwrap();

        let outcome = f.manager.teardown(&attachment, &[]).await;

        assert_eq!(outcome, TeardownOutcome::Removed);
        assert!(f.backend.network_names().is_empty());
        assert_eq!(
            f.control.calls(),
            vec![NetCall::Disconnect {
                name: "weather".to_string(),
                ip: "10.0.1.3".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn teardown_keeps_shared_network() {
        let f = fixture().await;
        let attachment = installed(&f, "weather").await;
        let other = f.backend.seed_container("visitor", &[]);
        f.backend.seed_connection("weather-network", &other).unwrap();
        f.backend.remove_service("weather").await.unwrap();

        let outcome = f.manager.teardown(&attachment, &[]).await;

        assert_eq!(outcome, TeardownOutcome::Retained(vec!["visitor".to_string()]));
        assert_eq!(f.backend.network_names(), vec!["weather-network"]);
    }

    #[tokio::test]
    async fn departing_dependents_do_not_keep_the_network() {
        let f = fixture().await;
        let attachment = installed(&f, "weather").await;
        let lingering = f.backend.seed_container("weather-store-json.1.zzz", &[]);
        f.backend.seed_connection("weather-network", &lingering).unwrap();
        f.backend.remove_service("weather").await.unwrap();

        let outcome = f
            .manager
            .teardown(&attachment, &["weather-store-json".to_string()])
            .await;

        // The lingering container still blocks removal.
        assert!(matches!(outcome, TeardownOutcome::Failed(_)));
        assert_eq!(f.backend.calls_of("remove_network").len(), 3);
    }

    #[tokio::test]
    async fn teardown_failures_are_reported_not_raised() {
        let f = fixture().await;
        let attachment = installed(&f, "weather").await;
        f.backend.remove_service("weather").await.unwrap();
        f.control
            .fail_when(|c| matches!(c, NetCall::Disconnect { .. }), 1);
        f.backend.fail_always("remove_network", None);

        let outcome = f.manager.teardown(&attachment, &[]).await;
        assert!(matches!(outcome, TeardownOutcome::Failed(_)));
    }
}
