//! Manifest compiler — SLA + topology → service specs.
//!
//! Pure: no I/O, no backend calls. The lifecycle orchestrator calls
//! [`ManifestCompiler::validate`] before touching anything external, then
//! [`ManifestCompiler::compile`] once the network topology is resolved.

use tracing::debug;

use crate::error::{ManifestError, ManifestResult};
use crate::image::ImageSettings;
use crate::sla::{DataboxType, Sla};
use crate::spec::{EnvVar, ServiceSpec, VolumeMount};
use crate::topology::NetworkTopology;

pub const ENV_LOCAL_NAME: &str = "DATABOX_LOCAL_NAME";
pub const ENV_ARBITER_ENDPOINT: &str = "DATABOX_ARBITER_ENDPOINT";
pub const ENV_EXPORT_SERVICE_ENDPOINT: &str = "DATABOX_EXPORT_SERVICE_ENDPOINT";
pub const ENV_STORE_ENDPOINT: &str = "DATABOX_STORE_ENDPOINT";
pub const ENV_DATASOURCE_PREFIX: &str = "DATASOURCE_";

/// Port every store listens on.
pub const STORE_PORT: u16 = 8080;
/// Mount point of a store's data volume.
pub const STORE_VOLUME_TARGET: &str = "/database";

/// Compiler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerSettings {
    pub images: ImageSettings,
    pub arbiter_endpoint: String,
    pub export_service_endpoint: String,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            images: ImageSettings::default(),
            arbiter_endpoint: "https://arbiter:8080".to_string(),
            export_service_endpoint: "https://export-service:8080".to_string(),
        }
    }
}

/// Output of a compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledWorkload {
    pub workload_type: DataboxType,
    pub primary: ServiceSpec,
    /// One spec per dependent store, in manifest order.
    pub dependents: Vec<ServiceSpec>,
}

impl CompiledWorkload {
    /// Every service name, primary first.
    pub fn service_names(&self) -> Vec<String> {
        std::iter::once(&self.primary)
            .chain(&self.dependents)
            .map(|spec| spec.name.clone())
            .collect()
    }
}

/// Compiles manifests into backend service specs.
#[derive(Debug, Clone, Default)]
pub struct ManifestCompiler {
    settings: CompilerSettings,
}

impl ManifestCompiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Check that the manifest describes an installable workload.
    ///
    /// Only apps and drivers are installed directly; stores exist solely as
    /// dependents of one of those.
    pub fn validate(&self, sla: &Sla) -> ManifestResult<DataboxType> {
        match sla.workload_type()? {
            DataboxType::Store => Err(ManifestError::UnsupportedType {
                name: sla.name.clone(),
                kind: DataboxType::Store.to_string(),
            }),
            kind => Ok(kind),
        }
    }

    /// Compile a normalized manifest against a resolved topology.
    pub fn compile(
        &self,
        sla: &Sla,
        topology: &NetworkTopology,
    ) -> ManifestResult<CompiledWorkload> {
        let workload_type = self.validate(sla)?;
        let primary = self.primary_spec(sla, workload_type, topology)?;
        let dependents = sla
            .stores()
            .iter()
            .map(|store| self.store_spec(sla, store, topology))
            .collect();

        debug!(
            sla = %sla.name,
            kind = %workload_type,
            stores = sla.stores().len(),
            "manifest compiled"
        );

        Ok(CompiledWorkload {
            workload_type,
            primary,
            dependents,
        })
    }

    fn primary_spec(
        &self,
        sla: &Sla,
        kind: DataboxType,
        topology: &NetworkTopology,
    ) -> ManifestResult<ServiceSpec> {
        let name = sla.local_name();
        let image = self.settings.images.image(sla, name);
        let mut spec = ServiceSpec::new(name, image, kind);

        spec.push_env(ENV_LOCAL_NAME, name);
        spec.push_env(ENV_ARBITER_ENDPOINT, &self.settings.arbiter_endpoint);

        if kind == DataboxType::App {
            spec.push_env(
                ENV_EXPORT_SERVICE_ENDPOINT,
                &self.settings.export_service_endpoint,
            );
            spec.env.extend(datasource_env(sla)?);
        }

        spec.env.extend(store_endpoint_env(sla));
        attach(&mut spec, topology);
        Ok(spec)
    }

    fn store_spec(&self, sla: &Sla, store_type: &str, topology: &NetworkTopology) -> ServiceSpec {
        let name = sla.store_service_name(store_type);
        let image = self.settings.images.image(sla, store_type);
        let mut spec = ServiceSpec::new(&name, image, DataboxType::Store);

        spec.push_env(ENV_LOCAL_NAME, &name);
        spec.push_env(ENV_ARBITER_ENDPOINT, &self.settings.arbiter_endpoint);
        spec.mounts.push(VolumeMount {
            source: name,
            target: STORE_VOLUME_TARGET.to_string(),
        });
        attach(&mut spec, topology);
        spec
    }
}

fn attach(spec: &mut ServiceSpec, topology: &NetworkTopology) {
    spec.networks.push(topology.network_name.clone());
    spec.dns_nameservers.push(topology.dns_ip.clone());
}

/// Environment key of a store endpoint when several stores are requested.
///
/// `store-json` → `DATABOX_STORE_JSON_ENDPOINT`.
pub fn store_endpoint_key(store_type: &str) -> String {
    format!(
        "DATABOX_{}_ENDPOINT",
        store_type.to_uppercase().replace('-', "_")
    )
}

/// Store endpoint variables for the primary workload.
///
/// A single store is exposed as the generic `DATABOX_STORE_ENDPOINT`; several
/// stores get one typed variable each. Existing workloads rely on both
/// shapes.
// TODO: unify on the typed variables once published drivers stop reading
// DATABOX_STORE_ENDPOINT.
pub fn store_endpoint_env(sla: &Sla) -> Vec<EnvVar> {
    let endpoint =
        |store: &str| format!("https://{}:{}", sla.store_service_name(store), STORE_PORT);

    match sla.stores() {
        [] => Vec::new(),
        [single] => vec![EnvVar::new(ENV_STORE_ENDPOINT, endpoint(single.as_str()))],
        stores => stores
            .iter()
            .map(|store| EnvVar::new(store_endpoint_key(store), endpoint(store.as_str())))
            .collect(),
    }
}

fn datasource_env(sla: &Sla) -> ManifestResult<Vec<EnvVar>> {
    sla.datasources
        .iter()
        .map(|datasource| {
            let descriptor = match &datasource.hypercat {
                Some(item) => serde_json::to_string(item),
                None => Ok("{}".to_string()),
            }
            .map_err(|e| ManifestError::Descriptor {
                clientid: datasource.clientid.clone(),
                reason: e.to_string(),
            })?;
            Ok(EnvVar::new(
                format!("{ENV_DATASOURCE_PREFIX}{}", datasource.clientid),
                descriptor,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{EndpointMode, MANAGER_CONSTRAINT};
    use serde_json::json;

    fn topology() -> NetworkTopology {
        NetworkTopology {
            network_name: "weather-network".to_string(),
            dns_ip: "10.0.5.2".to_string(),
        }
    }

    fn sla(value: serde_json::Value) -> Sla {
        serde_json::from_value::<Sla>(value)
            .unwrap()
            .normalized()
            .unwrap()
    }

    #[test]
    fn weather_driver_with_one_store() {
        let compiler = ManifestCompiler::default();
        let sla = sla(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": ["store-json"] }
        }));

        let compiled = compiler.compile(&sla, &topology()).unwrap();

        assert_eq!(compiled.primary.name, "weather");
        assert_eq!(compiled.dependents.len(), 1);
        assert_eq!(compiled.dependents[0].name, "weather-store-json");
        assert_eq!(
            compiled.primary.env_value(ENV_STORE_ENDPOINT),
            Some("https://weather-store-json:8080")
        );
        assert_eq!(compiled.primary.env_value(ENV_EXPORT_SERVICE_ENDPOINT), None);
        assert_eq!(compiled.service_names(), vec!["weather", "weather-store-json"]);
    }

    #[test]
    fn scalar_store_compiles_like_sequence() {
        let compiler = ManifestCompiler::default();
        let scalar = sla(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": "store-json" }
        }));
        let sequence = sla(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": ["store-json"] }
        }));

        assert_eq!(
            compiler.compile(&scalar, &topology()).unwrap(),
            compiler.compile(&sequence, &topology()).unwrap()
        );
    }

    #[test]
    fn several_stores_get_typed_variables() {
        let compiler = ManifestCompiler::default();
        let sla = sla(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": ["store-json", "store-time-series"] }
        }));

        let compiled = compiler.compile(&sla, &topology()).unwrap();
        let endpoints: Vec<_> = compiled
            .primary
            .env
            .iter()
            .filter(|var| var.key.ends_with("_ENDPOINT") && var.key != ENV_ARBITER_ENDPOINT)
            .collect();

        assert_eq!(endpoints.len(), 2);
        assert_eq!(
            compiled.primary.env_value("DATABOX_STORE_JSON_ENDPOINT"),
            Some("https://weather-store-json:8080")
        );
        assert_eq!(
            compiled.primary.env_value("DATABOX_STORE_TIME_SERIES_ENDPOINT"),
            Some("https://weather-store-time-series:8080")
        );
        assert_eq!(compiled.primary.env_value(ENV_STORE_ENDPOINT), None);
    }

    #[test]
    fn app_gets_export_and_datasource_variables() {
        let compiler = ManifestCompiler::default();
        let sla = sla(json!({
            "name": "app-weather-view",
            "databox-type": "app",
            "datasources": [
                {
                    "clientid": "TEMP",
                    "hypercat": {
                        "href": "https://weather-store-json:8080/temperature",
                        "item-metadata": []
                    }
                },
                { "clientid": "EMPTY" }
            ]
        }));

        let compiled = compiler.compile(&sla, &topology()).unwrap();
        let primary = &compiled.primary;

        assert_eq!(
            primary.env_value(ENV_EXPORT_SERVICE_ENDPOINT),
            Some("https://export-service:8080")
        );
        let descriptor: serde_json::Value =
            serde_json::from_str(primary.env_value("DATASOURCE_TEMP").unwrap()).unwrap();
        assert_eq!(
            descriptor["href"],
            "https://weather-store-json:8080/temperature"
        );
        assert_eq!(primary.env_value("DATASOURCE_EMPTY"), Some("{}"));
        assert!(compiled.dependents.is_empty());
    }

    #[test]
    fn specs_carry_topology_and_placement() {
        let compiler = ManifestCompiler::default();
        let sla = sla(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": "store-json" }
        }));

        let compiled = compiler.compile(&sla, &topology()).unwrap();
        for spec in std::iter::once(&compiled.primary).chain(&compiled.dependents) {
            assert_eq!(spec.networks, vec!["weather-network"]);
            assert_eq!(spec.dns_nameservers, vec!["10.0.5.2"]);
            assert_eq!(spec.placement_constraints, vec![MANAGER_CONSTRAINT]);
            assert_eq!(spec.endpoint_mode, EndpointMode::Dnsrr);
            assert_eq!(spec.replicas, 1);
        }

        let store = &compiled.dependents[0];
        assert_eq!(store.image, "databoxsystems/store-json:latest");
        assert_eq!(store.mounts[0].source, "weather-store-json");
        assert_eq!(store.mounts[0].target, STORE_VOLUME_TARGET);
        assert_eq!(store.workload_type(), Some(DataboxType::Store));
    }

    #[test]
    fn missing_or_unknown_type_is_rejected() {
        let compiler = ManifestCompiler::default();
        for raw in [
            json!({ "name": "x" }),
            json!({ "name": "x", "databox-type": "service" }),
            json!({ "name": "x", "databox-type": "store" }),
        ] {
            let sla = sla(raw);
            assert!(compiler.validate(&sla).is_err());
            assert!(compiler.compile(&sla, &topology()).is_err());
        }
    }

    #[test]
    fn endpoint_key_normalization() {
        assert_eq!(store_endpoint_key("store-json"), "DATABOX_STORE_JSON_ENDPOINT");
        assert_eq!(store_endpoint_key("store-a-b"), "DATABOX_STORE_A_B_ENDPOINT");
        assert_eq!(
            store_endpoint_key("store-time-series"),
            "DATABOX_STORE_TIME_SERIES_ENDPOINT"
        );
    }
}
