//! Docker Engine backend.
//!
//! Speaks the Engine HTTP API over the local unix socket with a fresh
//! HTTP/1 connection per request. Docker's PascalCase payloads are mapped to
//! the backend-neutral types in [`crate::types`] by the private `wire`
//! module.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use databox_manifest::ServiceSpec;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::net::UnixStream;
use tracing::{debug, trace};

use crate::backend::{BackendFuture, ContainerBackend};
use crate::error::{BackendError, BackendResult};
use crate::types::{
    ContainerFilter, ContainerInfo, LabelSelector, NetworkConfig, NetworkInfo, SecretInfo,
    SecretSpec, ServiceInfo, TaskInfo,
};

/// Default Engine API socket.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// [`crate::ContainerBackend`] backed by a Docker Engine in swarm mode.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    socket: PathBuf,
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET)
    }
}

impl DockerBackend {
    pub fn new(socket: impl AsRef<Path>) -> Self {
        Self {
            socket: socket.as_ref().to_path_buf(),
        }
    }

    /// Send one request; returns the status and the collected body.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> BackendResult<(StatusCode, Bytes)> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            BackendError::Unavailable(format!("{}: {e}", self.socket.display()))
        })?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                trace!(error = %e, "docker connection closed");
            }
        });

        let payload = match &body {
            Some(value) => {
                Bytes::from(serde_json::to_vec(value).map_err(|e| BackendError::Decode(e.to_string()))?)
            }
            None => Bytes::new(),
        };
        let req = Request::builder()
            .method(method.clone())
            .uri(path)
            .header("host", "docker")
            .header("content-type", "application/json")
            .body(Full::new(payload))
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?
            .to_bytes();
        debug!(%method, %path, %status, "docker api call");
        Ok((status, bytes))
    }

    /// Send a request and map non-2xx statuses to errors.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        kind: &'static str,
        name: &str,
    ) -> BackendResult<Bytes> {
        let (status, bytes) = self.send(method, path, body).await?;
        match status {
            s if s.is_success() => Ok(bytes),
            StatusCode::NOT_FOUND => Err(BackendError::not_found(kind, name)),
            StatusCode::CONFLICT => Err(BackendError::conflict(kind, name)),
            s => Err(BackendError::Api {
                status: s.as_u16(),
                message: error_message(&bytes),
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        kind: &'static str,
        name: &str,
    ) -> BackendResult<T> {
        let bytes = self.call(Method::GET, path, None, kind, name).await?;
        decode(&bytes)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        kind: &'static str,
        name: &str,
    ) -> BackendResult<T> {
        let bytes = self.call(Method::POST, path, Some(body), kind, name).await?;
        decode(&bytes)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> BackendResult<T> {
    serde_json::from_slice(bytes).map_err(|e| BackendError::Decode(e.to_string()))
}

fn error_message(bytes: &[u8]) -> String {
    serde_json::from_slice::<wire::ErrorBody>(bytes)
        .map(|body| body.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
}

/// `filters` query parameter for the given filter map.
fn filters_query(filters: &BTreeMap<&str, Vec<String>>) -> String {
    let raw = serde_json::to_string(filters).unwrap_or_else(|_| "{}".to_string());
    format!("filters={}", encode_component(&raw))
}

fn label_filters(labels: &[LabelSelector]) -> BTreeMap<&'static str, Vec<String>> {
    let mut filters = BTreeMap::new();
    if !labels.is_empty() {
        filters.insert("label", labels.iter().map(LabelSelector::to_filter).collect());
    }
    filters
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 3);
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Engine API body for a service spec.
fn service_body(spec: &ServiceSpec) -> Value {
    let env: Vec<String> = spec.env.iter().map(|var| var.to_assignment()).collect();
    let secrets: Vec<Value> = spec
        .secrets
        .iter()
        .map(|s| {
            json!({
                "SecretID": s.secret_id,
                "SecretName": s.secret_name,
                "File": { "Name": s.file_name, "UID": s.uid, "GID": s.gid, "Mode": s.mode },
            })
        })
        .collect();
    let mounts: Vec<Value> = spec
        .mounts
        .iter()
        .map(|m| json!({ "Source": m.source, "Target": m.target, "Type": "volume" }))
        .collect();
    let networks: Vec<Value> = spec
        .networks
        .iter()
        .map(|n| json!({ "Target": n }))
        .collect();

    json!({
        "Name": spec.name,
        "Labels": spec.labels,
        "TaskTemplate": {
            "ContainerSpec": {
                "Image": spec.image,
                "Env": env,
                "Secrets": secrets,
                "Mounts": mounts,
                "DNSConfig": { "Nameservers": spec.dns_nameservers },
            },
            "Placement": { "Constraints": spec.placement_constraints },
            "Networks": networks,
        },
        "Mode": { "Replicated": { "Replicas": spec.replicas } },
        "UpdateConfig": { "Parallelism": 1 },
        "EndpointSpec": { "Mode": spec.endpoint_mode.as_str() },
    })
}

impl ContainerBackend for DockerBackend {
    fn ping(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.call(Method::GET, "/_ping", None, "engine", "ping")
                .await
                .map(|_| ())
        })
    }

    fn create_service<'a>(&'a self, spec: &'a ServiceSpec) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let created: wire::Created = self
                .post_json("/services/create", service_body(spec), "service", &spec.name)
                .await?;
            Ok(created.id)
        })
    }

    fn inspect_service<'a>(&'a self, service: &'a str) -> BackendFuture<'a, ServiceInfo> {
        Box::pin(async move {
            let path = format!("/services/{}", encode_component(service));
            let found: wire::Service = self.get_json(&path, "service", service).await?;
            Ok(found.into())
        })
    }

    fn remove_service<'a>(&'a self, service: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/services/{}", encode_component(service));
            self.call(Method::DELETE, &path, None, "service", service)
                .await
                .map(|_| ())
        })
    }

    fn list_services<'a>(
        &'a self,
        labels: &'a [LabelSelector],
    ) -> BackendFuture<'a, Vec<ServiceInfo>> {
        Box::pin(async move {
            let path = format!("/services?{}", filters_query(&label_filters(labels)));
            let found: Vec<wire::Service> = self.get_json(&path, "service", "list").await?;
            Ok(found.into_iter().map(Into::into).collect())
        })
    }

    fn list_tasks<'a>(&'a self, service: &'a str) -> BackendFuture<'a, Vec<TaskInfo>> {
        Box::pin(async move {
            let mut filters = BTreeMap::new();
            filters.insert("service", vec![service.to_string()]);
            let path = format!("/tasks?{}", filters_query(&filters));
            let found: Vec<wire::Task> = self.get_json(&path, "task", service).await?;
            Ok(found.into_iter().map(Into::into).collect())
        })
    }

    fn list_containers<'a>(
        &'a self,
        filter: &'a ContainerFilter,
    ) -> BackendFuture<'a, Vec<ContainerInfo>> {
        Box::pin(async move {
            let mut filters = label_filters(&filter.labels);
            if let Some(name) = &filter.name {
                filters.insert("name", vec![name.clone()]);
            }
            let path = format!("/containers/json?all=true&{}", filters_query(&filters));
            let found: Vec<wire::Container> = self.get_json(&path, "container", "list").await?;
            Ok(found.into_iter().map(Into::into).collect())
        })
    }

    fn remove_container<'a>(&'a self, container: &'a str, force: bool) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/containers/{}?force={force}", encode_component(container));
            self.call(Method::DELETE, &path, None, "container", container)
                .await
                .map(|_| ())
        })
    }

    fn create_secret<'a>(&'a self, spec: &'a SecretSpec) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let body = json!({
                "Name": spec.name,
                "Labels": spec.labels,
                "Data": STANDARD.encode(&spec.data),
            });
            let created: wire::Created = self
                .post_json("/secrets/create", body, "secret", &spec.name)
                .await?;
            Ok(created.id)
        })
    }

    fn inspect_secret<'a>(&'a self, secret: &'a str) -> BackendFuture<'a, SecretInfo> {
        Box::pin(async move {
            let path = format!("/secrets/{}", encode_component(secret));
            let found: wire::Secret = self.get_json(&path, "secret", secret).await?;
            Ok(found.into())
        })
    }

    fn list_secrets<'a>(
        &'a self,
        labels: &'a [LabelSelector],
    ) -> BackendFuture<'a, Vec<SecretInfo>> {
        Box::pin(async move {
            let path = format!("/secrets?{}", filters_query(&label_filters(labels)));
            let found: Vec<wire::Secret> = self.get_json(&path, "secret", "list").await?;
            Ok(found.into_iter().map(Into::into).collect())
        })
    }

    fn remove_secret<'a>(&'a self, secret: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/secrets/{}", encode_component(secret));
            self.call(Method::DELETE, &path, None, "secret", secret)
                .await
                .map(|_| ())
        })
    }

    fn list_networks<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<NetworkInfo>> {
        Box::pin(async move {
            let mut filters = BTreeMap::new();
            filters.insert("name", vec![name.to_string()]);
            let path = format!("/networks?{}", filters_query(&filters));
            let found: Vec<wire::Network> = self.get_json(&path, "network", name).await?;
            // The engine's name filter matches substrings.
            Ok(found
                .into_iter()
                .map(NetworkInfo::from)
                .filter(|net| net.name == name)
                .collect())
        })
    }

    fn create_network<'a>(&'a self, config: &'a NetworkConfig) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let body = json!({
                "Name": config.name,
                "Driver": config.driver,
                "Internal": config.internal,
                "Attachable": config.attachable,
                "CheckDuplicate": true,
            });
            let created: wire::Created = self
                .post_json("/networks/create", body, "network", &config.name)
                .await?;
            Ok(created.id)
        })
    }

    fn inspect_network<'a>(&'a self, network: &'a str) -> BackendFuture<'a, NetworkInfo> {
        Box::pin(async move {
            let path = format!("/networks/{}", encode_component(network));
            let found: wire::Network = self.get_json(&path, "network", network).await?;
            Ok(found.into())
        })
    }

    fn connect_network<'a>(
        &'a self,
        network: &'a str,
        container: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/networks/{}/connect", encode_component(network));
            let body = json!({ "Container": container });
            self.call(Method::POST, &path, Some(body), "network", network)
                .await
                .map(|_| ())
        })
    }

    fn disconnect_network<'a>(
        &'a self,
        network: &'a str,
        container: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/networks/{}/disconnect", encode_component(network));
            let body = json!({ "Container": container, "Force": true });
            self.call(Method::POST, &path, Some(body), "network", network)
                .await
                .map(|_| ())
        })
    }

    fn remove_network<'a>(&'a self, network: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/networks/{}", encode_component(network));
            self.call(Method::DELETE, &path, None, "network", network)
                .await
                .map(|_| ())
        })
    }
}

/// Engine API payload shapes (only the fields the engine reads).
mod wire {
    use std::collections::BTreeMap;

    use serde::Deserialize;

    use crate::types::{
        ContainerInfo, NetworkInfo, NetworkMember, SecretInfo, ServiceInfo, TaskInfo,
    };

    #[derive(Deserialize)]
    pub struct ErrorBody {
        pub message: String,
    }

    #[derive(Deserialize)]
    pub struct Created {
        #[serde(alias = "Id", rename = "ID")]
        pub id: String,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Service {
        #[serde(rename = "ID")]
        pub id: String,
        pub spec: ServiceSpec,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct ServiceSpec {
        pub name: String,
        #[serde(default)]
        pub labels: BTreeMap<String, String>,
        pub task_template: TaskTemplate,
        /// Deprecated location, still reported by older engines.
        #[serde(default)]
        pub networks: Vec<NetworkAttachment>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct TaskTemplate {
        pub container_spec: ContainerSpec,
        #[serde(default)]
        pub networks: Vec<NetworkAttachment>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct ContainerSpec {
        #[serde(default)]
        pub image: String,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct NetworkAttachment {
        pub target: String,
    }

    impl From<Service> for ServiceInfo {
        fn from(svc: Service) -> Self {
            let spec = svc.spec;
            let networks = spec
                .task_template
                .networks
                .into_iter()
                .chain(spec.networks)
                .map(|n| n.target)
                .collect();
            ServiceInfo {
                id: svc.id,
                name: spec.name,
                image: spec.task_template.container_spec.image,
                labels: spec.labels,
                networks,
            }
        }
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Task {
        #[serde(rename = "ID")]
        pub id: String,
        #[serde(rename = "ServiceID")]
        pub service_id: String,
        #[serde(default)]
        pub slot: u64,
        pub status: TaskStatus,
        #[serde(default)]
        pub desired_state: String,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct TaskStatus {
        #[serde(default)]
        pub state: String,
        #[serde(default)]
        pub container_status: Option<ContainerStatus>,
    }

    #[derive(Deserialize)]
    pub struct ContainerStatus {
        #[serde(rename = "ContainerID", default)]
        pub container_id: Option<String>,
    }

    impl From<Task> for TaskInfo {
        fn from(task: Task) -> Self {
            TaskInfo {
                id: task.id,
                service_id: task.service_id,
                slot: task.slot,
                state: task.status.state,
                desired_state: task.desired_state,
                container_id: task.status.container_status.and_then(|c| c.container_id),
            }
        }
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Container {
        pub id: String,
        #[serde(default)]
        pub names: Vec<String>,
        #[serde(default)]
        pub image: String,
        #[serde(default)]
        pub state: String,
        #[serde(default)]
        pub labels: BTreeMap<String, String>,
        #[serde(default)]
        pub network_settings: Option<NetworkSettings>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct NetworkSettings {
        #[serde(default)]
        pub networks: BTreeMap<String, EndpointSettings>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct EndpointSettings {
        #[serde(rename = "IPAddress", default)]
        pub ip_address: String,
    }

    impl From<Container> for ContainerInfo {
        fn from(c: Container) -> Self {
            let name = c
                .names
                .first()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default();
            let networks = c
                .network_settings
                .map(|s| {
                    s.networks
                        .into_iter()
                        .map(|(net, ep)| (net, ep.ip_address))
                        .collect()
                })
                .unwrap_or_default();
            ContainerInfo {
                id: c.id,
                name,
                image: c.image,
                state: c.state,
                labels: c.labels,
                networks,
            }
        }
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Secret {
        #[serde(rename = "ID")]
        pub id: String,
        pub spec: SecretSpec,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct SecretSpec {
        pub name: String,
        #[serde(default)]
        pub labels: BTreeMap<String, String>,
    }

    impl From<Secret> for SecretInfo {
        fn from(s: Secret) -> Self {
            SecretInfo {
                id: s.id,
                name: s.spec.name,
                labels: s.spec.labels,
            }
        }
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Network {
        pub id: String,
        pub name: String,
        #[serde(default)]
        pub driver: String,
        #[serde(default)]
        pub internal: bool,
        #[serde(default)]
        pub attachable: bool,
        #[serde(default)]
        pub containers: Option<BTreeMap<String, Endpoint>>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Endpoint {
        #[serde(default)]
        pub name: String,
        #[serde(rename = "IPv4Address", default)]
        pub ipv4_address: String,
    }

    impl From<Network> for NetworkInfo {
        fn from(n: Network) -> Self {
            let members = n
                .containers
                .unwrap_or_default()
                .into_iter()
                .map(|(container_id, ep)| NetworkMember {
                    container_id,
                    name: ep.name.trim_start_matches('/').to_string(),
                    ipv4_address: ep.ipv4_address,
                })
                .collect();
            NetworkInfo {
                id: n.id,
                name: n.name,
                driver: n.driver,
                internal: n.internal,
                attachable: n.attachable,
                members,
            }
        }
    }
}
