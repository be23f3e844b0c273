//! Peer extraction from a service's environment.

use databox_manifest::EnvVar;
use databox_manifest::compile::{
    ENV_ARBITER_ENDPOINT, ENV_DATASOURCE_PREFIX, ENV_EXPORT_SERVICE_ENDPOINT,
};
use http::Uri;
use serde_json::Value;
use tracing::debug;

/// Hostname of a URL, if it has one.
pub fn url_host(raw: &str) -> Option<String> {
    raw.parse::<Uri>()
        .ok()?
        .host()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}

/// Backend service name of a task container (`weather.1.abc` → `weather`).
pub fn to_service_name(container_name: &str) -> &str {
    container_name
        .split_once('.')
        .map_or(container_name, |(service, _)| service)
}

fn is_endpoint_key(key: &str) -> bool {
    key == ENV_ARBITER_ENDPOINT
        || key == ENV_EXPORT_SERVICE_ENDPOINT
        || (key.starts_with("DATABOX_") && key.ends_with("_ENDPOINT"))
}

/// Hostnames a workload needs to reach, in first-seen order, deduplicated.
///
/// `*_ENDPOINT` values contribute their URL host; `DATASOURCE_*` values
/// contribute the host of the descriptor's `href` unless it is empty. Every
/// other variable is ignored.
pub fn peers_of_env(env: &[EnvVar]) -> Vec<String> {
    let mut peers: Vec<String> = Vec::new();
    for var in env {
        let host = if is_endpoint_key(&var.key) {
            url_host(&var.value)
        } else if var.key.starts_with(ENV_DATASOURCE_PREFIX) {
            datasource_host(&var.key, &var.value)
        } else {
            None
        };
        if let Some(host) = host {
            if !peers.contains(&host) {
                peers.push(host);
            }
        }
    }
    peers
}

fn datasource_host(key: &str, descriptor: &str) -> Option<String> {
    let parsed: Value = match serde_json::from_str(descriptor) {
        Ok(value) => value,
        Err(e) => {
            debug!(%key, error = %e, "ignoring unparsable datasource descriptor");
            return None;
        }
    };
    let href = parsed.get("href")?.as_str()?;
    if href.is_empty() {
        return None;
    }
    url_host(href)
}
