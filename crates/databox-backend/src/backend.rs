//! The container backend capability.

use std::future::Future;
use std::pin::Pin;

use databox_manifest::ServiceSpec;

use crate::error::BackendResult;
use crate::types::{
    ContainerFilter, ContainerInfo, LabelSelector, NetworkConfig, NetworkInfo, SecretInfo,
    SecretSpec, ServiceInfo, TaskInfo,
};

/// Boxed future returned by every backend operation.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;

/// Service, secret and network CRUD plus task/container listing.
///
/// Object-safe so it can be shared as `Arc<dyn ContainerBackend>`.
/// Identifier arguments accept either a name or a backend id.
pub trait ContainerBackend: Send + Sync {
    /// Check that the backend is reachable.
    fn ping(&self) -> BackendFuture<'_, ()>;

    // ── Services ───────────────────────────────────────────────────

    /// Submit a service. Returns the backend id.
    fn create_service<'a>(&'a self, spec: &'a ServiceSpec) -> BackendFuture<'a, String>;

    fn inspect_service<'a>(&'a self, service: &'a str) -> BackendFuture<'a, ServiceInfo>;

    fn remove_service<'a>(&'a self, service: &'a str) -> BackendFuture<'a, ()>;

    fn list_services<'a>(
        &'a self,
        labels: &'a [LabelSelector],
    ) -> BackendFuture<'a, Vec<ServiceInfo>>;

    /// Every task (running or not) of one service.
    fn list_tasks<'a>(&'a self, service: &'a str) -> BackendFuture<'a, Vec<TaskInfo>>;

    // ── Containers ─────────────────────────────────────────────────

    /// All containers, stopped ones included, matching the filter.
    fn list_containers<'a>(
        &'a self,
        filter: &'a ContainerFilter,
    ) -> BackendFuture<'a, Vec<ContainerInfo>>;

    fn remove_container<'a>(&'a self, container: &'a str, force: bool) -> BackendFuture<'a, ()>;

    // ── Secrets ────────────────────────────────────────────────────

    /// Create a secret. Returns the backend id.
    fn create_secret<'a>(&'a self, spec: &'a SecretSpec) -> BackendFuture<'a, String>;

    fn inspect_secret<'a>(&'a self, secret: &'a str) -> BackendFuture<'a, SecretInfo>;

    fn list_secrets<'a>(&'a self, labels: &'a [LabelSelector])
    -> BackendFuture<'a, Vec<SecretInfo>>;

    fn remove_secret<'a>(&'a self, secret: &'a str) -> BackendFuture<'a, ()>;

    // ── Networks ───────────────────────────────────────────────────

    /// Networks whose name is exactly `name`.
    fn list_networks<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<NetworkInfo>>;

    /// Create a network. Returns the backend id.
    fn create_network<'a>(&'a self, config: &'a NetworkConfig) -> BackendFuture<'a, String>;

    fn inspect_network<'a>(&'a self, network: &'a str) -> BackendFuture<'a, NetworkInfo>;

    fn connect_network<'a>(
        &'a self,
        network: &'a str,
        container: &'a str,
    ) -> BackendFuture<'a, ()>;

    fn disconnect_network<'a>(
        &'a self,
        network: &'a str,
        container: &'a str,
    ) -> BackendFuture<'a, ()>;

    fn remove_network<'a>(&'a self, network: &'a str) -> BackendFuture<'a, ()>;
}
