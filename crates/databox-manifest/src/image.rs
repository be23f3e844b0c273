//! Image location and tag selection.

use std::net::IpAddr;

use http::Uri;
use tracing::debug;

use crate::sla::Sla;

/// Inputs to image reference construction. Configuration, not engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettings {
    /// Development mode pulls `:latest`.
    pub dev_mode: bool,
    /// Platform version tag used outside development mode.
    pub version: String,
    /// Registry used when the manifest does not override it.
    pub default_registry: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            dev_mode: false,
            version: "latest".to_string(),
            default_registry: "databoxsystems".to_string(),
        }
    }
}

impl ImageSettings {
    /// Tag appended to every image reference.
    pub fn tag(&self) -> &str {
        if self.dev_mode { "latest" } else { self.version.as_str() }
    }

    /// Registry prefix (empty, or ending in `/`) for a manifest.
    ///
    /// First match wins: a loopback `storeUrl` selects locally built images,
    /// then the manifest's own `registry`, then the default registry.
    pub fn registry_prefix(&self, sla: &Sla) -> String {
        if sla.store_url.as_deref().is_some_and(is_loopback_url) {
            debug!(sla = %sla.name, "using local images");
            return String::new();
        }
        if let Some(registry) = sla.registry.as_deref().filter(|r| !r.is_empty()) {
            debug!(sla = %sla.name, %registry, "using manifest registry");
            return prefix(registry);
        }
        debug!(sla = %sla.name, registry = %self.default_registry, "using default registry");
        prefix(&self.default_registry)
    }

    /// Full image reference for `image_name`.
    pub fn image(&self, sla: &Sla, image_name: &str) -> String {
        format!("{}{}:{}", self.registry_prefix(sla), image_name, self.tag())
    }
}

fn prefix(registry: &str) -> String {
    let registry = registry.trim_end_matches('/');
    if registry.is_empty() {
        String::new()
    } else {
        format!("{registry}/")
    }
}

fn is_loopback_url(raw: &str) -> bool {
    let Ok(uri) = raw.parse::<Uri>() else {
        return false;
    };
    match uri.host() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sla(extra: serde_json::Value) -> Sla {
        let mut base = json!({ "name": "weather", "databox-type": "driver" });
        base.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn loopback_store_uses_local_images() {
        let settings = ImageSettings::default();
        for url in ["http://localhost:8181", "https://127.0.0.1/app", "http://[::1]:80"] {
            let sla = sla(json!({ "storeUrl": url, "registry": "myreg" }));
            assert_eq!(settings.registry_prefix(&sla), "", "{url}");
        }
    }

    #[test]
    fn manifest_registry_beats_default() {
        let settings = ImageSettings::default();
        let sla = sla(json!({ "storeUrl": "https://store.example.org", "registry": "myreg:5000/" }));
        assert_eq!(settings.registry_prefix(&sla), "myreg:5000/");
    }

    #[test]
    fn default_registry_otherwise() {
        let settings = ImageSettings::default();
        assert_eq!(settings.registry_prefix(&sla(json!({}))), "databoxsystems/");
    }

    #[test]
    fn tag_follows_dev_mode() {
        let mut settings = ImageSettings {
            dev_mode: false,
            version: "0.5.2".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.image(&sla(json!({})), "weather"), "databoxsystems/weather:0.5.2");
        settings.dev_mode = true;
        assert_eq!(settings.tag(), "latest");
    }
}
