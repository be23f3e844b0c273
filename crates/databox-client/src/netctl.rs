//! Network-control service capability.

use serde_json::json;
use tracing::debug;

use crate::ClientFuture;
use crate::api::ApiClient;

pub const CONNECT_PATH: &str = "/connect";
pub const DISCONNECT_PATH: &str = "/disconnect";
pub const PRIVILEGED_PATH: &str = "/privileged";

/// Mediates peer connectivity between workloads.
pub trait NetworkControl: Send + Sync {
    /// Allow `name` to reach each of `peers` (hostnames).
    fn connect<'a>(&'a self, name: &'a str, peers: &'a [String]) -> ClientFuture<'a, ()>;

    /// Forget the workload `name` that was reachable at `ip`.
    fn disconnect<'a>(&'a self, name: &'a str, ip: &'a str) -> ClientFuture<'a, ()>;

    /// Exempt `src_ip` (the orchestrator itself) from isolation.
    fn privileged<'a>(&'a self, src_ip: &'a str) -> ClientFuture<'a, ()>;
}

/// HTTP [`NetworkControl`].
#[derive(Debug, Clone)]
pub struct NetworkControlClient {
    api: ApiClient,
}

impl NetworkControlClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

impl NetworkControl for NetworkControlClient {
    fn connect<'a>(&'a self, name: &'a str, peers: &'a [String]) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let body = json!({ "name": name, "peers": peers });
            self.api.post_json(CONNECT_PATH, &body).await?;
            debug!(%name, ?peers, "peers connected");
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self, name: &'a str, ip: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let body = json!({ "name": name, "ip": ip });
            self.api.post_json(DISCONNECT_PATH, &body).await?;
            debug!(%name, %ip, "workload disconnected");
            Ok(())
        })
    }

    fn privileged<'a>(&'a self, src_ip: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let body = json!({ "src_ip": src_ip });
            self.api.post_json(PRIVILEGED_PATH, &body).await?;
            debug!(%src_ip, "privileged source registered");
            Ok(())
        })
    }
}
