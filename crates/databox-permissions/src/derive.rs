//! Grant derivation rules.

use databox_manifest::{DataboxType, Datasource, HttpMethod, ManifestResult, PermissionGrant, Sla};
use http::Uri;
use tracing::{debug, warn};

/// Names the rules need besides the manifest itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionContext {
    /// Subject of the catalogue-read grant on every dependent store.
    pub orchestrator: String,
    /// Host of the export service.
    pub export_service: String,
}

impl Default for PermissionContext {
    fn default() -> Self {
        Self {
            orchestrator: "container-manager".to_string(),
            export_service: "export-service".to_string(),
        }
    }
}

impl PermissionContext {
    /// Build from the export service endpoint URL; falls back to the raw
    /// string when it has no host.
    pub fn new(orchestrator: impl Into<String>, export_service_endpoint: &str) -> Self {
        let export_service = export_service_endpoint
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.host().map(str::to_string))
            .unwrap_or_else(|| export_service_endpoint.to_string());
        Self {
            orchestrator: orchestrator.into(),
            export_service,
        }
    }
}

/// `destination = ["u1","u2"]`
pub fn export_caveat<'a>(urls: impl IntoIterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = urls.into_iter().map(|url| format!("\"{url}\"")).collect();
    format!("destination = [{}]", quoted.join(","))
}

/// Every grant the workload described by `sla` needs, in push order.
pub fn derive(sla: &Sla, ctx: &PermissionContext) -> ManifestResult<Vec<PermissionGrant>> {
    let kind = sla.workload_type()?;
    let subject = sla.local_name();
    let mut grants = Vec::new();

    if kind == DataboxType::App && !sla.export_whitelist.is_empty() {
        let caveat = export_caveat(sla.export_whitelist.iter().map(|t| t.url.as_str()));
        for path in ["/export/", "/lp/export/"] {
            grants.push(
                PermissionGrant::new(subject, &ctx.export_service, path, HttpMethod::Post)
                    .with_caveat(caveat.clone()),
            );
        }
    }

    if kind == DataboxType::App {
        for datasource in &sla.datasources {
            datasource_grants(subject, datasource, &mut grants);
        }
    }

    for store in sla.store_service_names() {
        grants.push(PermissionGrant::new(&ctx.orchestrator, &store, "/cat", HttpMethod::Get));
        for (path, method) in [
            ("/status", HttpMethod::Get),
            ("/ws", HttpMethod::Get),
            ("/sub/*", HttpMethod::Get),
            ("/unsub/*", HttpMethod::Get),
            ("/*", HttpMethod::Post),
            ("/*", HttpMethod::Get),
            ("/cat", HttpMethod::Post),
        ] {
            grants.push(PermissionGrant::new(subject, &store, path, method));
        }
    }

    debug!(sla = %sla.name, grants = grants.len(), "permissions derived");
    Ok(grants)
}

fn datasource_grants(subject: &str, datasource: &Datasource, grants: &mut Vec<PermissionGrant>) {
    let Some(item) = &datasource.hypercat else {
        return;
    };
    let Some((host, name)) = split_href(&item.href) else {
        warn!(clientid = %datasource.clientid, href = %item.href, "datasource has no usable href");
        return;
    };

    if item.is_actuator() {
        grants.push(PermissionGrant::new(
            subject,
            &host,
            format!("/{name}/*"),
            HttpMethod::Post,
        ));
    }
    for path in [
        "/status".to_string(),
        format!("/{name}"),
        format!("/{name}/*"),
        "/ws".to_string(),
        format!("/sub/{name}/*"),
    ] {
        grants.push(PermissionGrant::new(subject, &host, path, HttpMethod::Get));
    }
}

/// `https://store:8080/sensor` → `("store", "sensor")`.
fn split_href(href: &str) -> Option<(String, String)> {
    let uri: Uri = href.parse().ok()?;
    let host = uri.host().filter(|h| !h.is_empty())?.to_string();
    let name = uri.path().strip_prefix('/').unwrap_or(uri.path()).to_string();
    Some((host, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sla(value: serde_json::Value) -> Sla {
        serde_json::from_value::<Sla>(value)
            .unwrap()
            .normalized()
            .unwrap()
    }

    fn routes(grants: &[PermissionGrant]) -> Vec<String> {
        grants.iter().map(ToString::to_string).collect()
    }

    fn datasource(href: &str, actuator: bool) -> serde_json::Value {
        json!({
            "clientid": "sensor",
            "hypercat": {
                "href": href,
                "item-metadata": [
                    { "rel": "urn:X-databox:rels:isActuator", "val": actuator }
                ]
            }
        })
    }

    #[test]
    fn export_whitelist_grants_both_export_routes() {
        let sla = sla(json!({
            "name": "app-a",
            "databox-type": "app",
            "export-whitelist": [{ "url": "https://a.example" }, { "url": "https://b.example" }]
        }));

        let grants = derive(&sla, &PermissionContext::default()).unwrap();

        assert_eq!(
            routes(&grants),
            vec!["app-a -> POST export-service/export/", "app-a -> POST export-service/lp/export/"]
        );
        assert!(
            grants
                .iter()
                .all(|g| g.caveats == vec![r#"destination = ["https://a.example","https://b.example"]"#])
        );
    }

    #[test]
    fn drivers_get_no_export_or_datasource_grants() {
        let sla = sla(json!({
            "name": "weather",
            "databox-type": "driver",
            "export-whitelist": [{ "url": "https://a.example" }],
            "datasources": [datasource("https://other-store:8080/sensor", true)]
        }));

        assert!(derive(&sla, &PermissionContext::default()).unwrap().is_empty());
    }

    #[test]
    fn actuator_datasource_gets_write_route() {
        let sla = sla(json!({
            "name": "app-a",
            "databox-type": "app",
            "datasources": [datasource("https://driver-store:8080/light", true)]
        }));

        let grants = derive(&sla, &PermissionContext::default()).unwrap();

        assert_eq!(
            routes(&grants),
            vec![
                "app-a -> POST driver-store/light/*",
                "app-a -> GET driver-store/status",
                "app-a -> GET driver-store/light",
                "app-a -> GET driver-store/light/*",
                "app-a -> GET driver-store/ws",
                "app-a -> GET driver-store/sub/light/*",
            ]
        );
    }

    #[test]
    fn sensor_datasource_is_read_only() {
        let sla = sla(json!({
            "name": "app-a",
            "databox-type": "app",
            "datasources": [datasource("https://driver-store:8080/temp", false)]
        }));

        let grants = derive(&sla, &PermissionContext::default()).unwrap();

        assert_eq!(grants.len(), 5);
        assert!(grants.iter().all(|g| g.route.method == HttpMethod::Get));
    }

    #[test]
    fn datasources_without_descriptor_or_host_are_skipped() {
        let sla = sla(json!({
            "name": "app-a",
            "databox-type": "app",
            "datasources": [
                { "clientid": "bare" },
                datasource("", false)
            ]
        }));

        assert!(derive(&sla, &PermissionContext::default()).unwrap().is_empty());
    }

    #[test]
    fn each_store_gets_catalogue_and_owner_routes() {
        let sla = sla(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": "store-json" }
        }));

        let grants = derive(&sla, &PermissionContext::default()).unwrap();

        assert_eq!(
            routes(&grants),
            vec![
                "container-manager -> GET weather-store-json/cat",
                "weather -> GET weather-store-json/status",
                "weather -> GET weather-store-json/ws",
                "weather -> GET weather-store-json/sub/*",
                "weather -> GET weather-store-json/unsub/*",
                "weather -> POST weather-store-json/*",
                "weather -> GET weather-store-json/*",
                "weather -> POST weather-store-json/cat",
            ]
        );
    }

    #[test]
    fn missing_type_is_an_error() {
        let sla = sla(json!({ "name": "mystery" }));
        assert!(derive(&sla, &PermissionContext::default()).is_err());
    }

    #[test]
    fn context_takes_host_from_endpoint() {
        let ctx = PermissionContext::new("container-manager", "https://export-service:8080");
        assert_eq!(ctx.export_service, "export-service");
        assert_eq!(PermissionContext::new("cm", "not a url").export_service, "not a url");
    }
}
