//! SLA manifest schema.
//!
//! Manifests arrive as loosely-shaped JSON. Every optional field is explicit
//! here and the defaulting rules are applied once, by [`Sla::normalized`]:
//!
//! - `localContainerName` defaults to the image-name part of `name`
//!   (`registry/org/driver-x:1.0` → `driver-x`).
//! - `resource-requirements.store` accepts a scalar or a sequence and is
//!   always a sequence after parsing.
//!
//! Fields the engine does not interpret are kept in `extra` so a persisted
//! record round-trips unchanged.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ManifestError, ManifestResult};

/// Catalogue metadata relation flagging a datasource as writable.
pub const ACTUATOR_REL: &str = "urn:X-databox:rels:isActuator";

static REPO_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:.*/)?([^/:\s]+)(?::.*|$)").expect("static regex")
});

/// Kind of workload a manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataboxType {
    App,
    Driver,
    Store,
}

impl DataboxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataboxType::App => "app",
            DataboxType::Driver => "driver",
            DataboxType::Store => "store",
        }
    }
}

impl fmt::Display for DataboxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataboxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(DataboxType::App),
            "driver" => Ok(DataboxType::Driver),
            "store" => Ok(DataboxType::Store),
            other => Err(other.to_string()),
        }
    }
}

/// A workload manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    pub name: String,
    /// Raw type string; validated by [`Sla::workload_type`].
    #[serde(rename = "databox-type", default, skip_serializing_if = "Option::is_none")]
    pub databox_type: Option<String>,
    #[serde(
        rename = "localContainerName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub local_container_name: Option<String>,
    #[serde(
        rename = "resource-requirements",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_requirements: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<Datasource>,
    #[serde(rename = "export-whitelist", default, skip_serializing_if = "Vec::is_empty")]
    pub export_whitelist: Vec<ExportTarget>,
    #[serde(
        rename = "external-whitelist",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub external_whitelist: Vec<ExternalWhitelist>,
    /// Image registry override (SDK installs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    /// Where the manifest was fetched from; loopback means a local image.
    #[serde(rename = "storeUrl", default, skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `resource-requirements` block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub store: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A datasource the workload is allowed to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    pub clientid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypercat: Option<CatalogueItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Hypercat catalogue descriptor of a datasource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogueItem {
    #[serde(default)]
    pub href: String,
    #[serde(rename = "item-metadata", default)]
    pub item_metadata: Vec<MetadataItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A `rel`/`val` pair from a catalogue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub rel: String,
    pub val: Value,
}

/// One entry of the export whitelist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTarget {
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of the external (internet) whitelist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalWhitelist {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Identity under which a workload is credentialed and registered with
/// the policy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadIdentity {
    pub local_name: String,
    pub databox_type: DataboxType,
}

impl CatalogueItem {
    /// Whether the catalogue marks this datasource as an actuator.
    pub fn is_actuator(&self) -> bool {
        self.item_metadata
            .iter()
            .any(|item| item.rel == ACTUATOR_REL && item.val == Value::Bool(true))
    }
}

impl Sla {
    /// Apply the defaulting rules. Idempotent.
    pub fn normalized(mut self) -> ManifestResult<Self> {
        if self.local_container_name.is_none() {
            self.local_container_name = Some(repo_tag_to_name(&self.name)?);
        }
        Ok(self)
    }

    /// Validate and return the workload type.
    pub fn workload_type(&self) -> ManifestResult<DataboxType> {
        let raw = self
            .databox_type
            .as_deref()
            .ok_or_else(|| ManifestError::MissingType(self.name.clone()))?;
        raw.parse().map_err(|kind| ManifestError::UnsupportedType {
            name: self.name.clone(),
            kind,
        })
    }

    /// Name of the primary service (and of its credentials).
    pub fn local_name(&self) -> &str {
        self.local_container_name.as_deref().unwrap_or(&self.name)
    }

    /// Requested dependent store types, in manifest order.
    pub fn stores(&self) -> &[String] {
        self.resource_requirements
            .as_ref()
            .map(|r| r.store.as_slice())
            .unwrap_or(&[])
    }

    /// Service name of the dependent store of the given type.
    pub fn store_service_name(&self, store_type: &str) -> String {
        format!("{}-{}", self.local_name(), store_type)
    }

    /// Service names of every dependent store.
    pub fn store_service_names(&self) -> Vec<String> {
        self.stores()
            .iter()
            .map(|store| self.store_service_name(store))
            .collect()
    }

    /// Name of the per-workload overlay network.
    pub fn network_name(&self) -> String {
        format!("{}-network", self.local_name())
    }

    /// Identity of the dependent store of the given type.
    pub fn store_identity(&self, store_type: &str) -> WorkloadIdentity {
        WorkloadIdentity {
            local_name: self.store_service_name(store_type),
            databox_type: DataboxType::Store,
        }
    }
}

/// Extract the image name from a repository tag.
///
/// `databoxsystems/driver-os-monitor:0.5.1` → `driver-os-monitor`.
pub fn repo_tag_to_name(repo_tag: &str) -> ManifestResult<String> {
    REPO_TAG
        .captures(repo_tag.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ManifestError::InvalidName(repo_tag.to_string()))
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(store)) => vec![store],
        Some(OneOrMany::Many(stores)) => stores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Sla {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn scalar_store_becomes_sequence() {
        let scalar = parse(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": "store-json" }
        }));
        let sequence = parse(json!({
            "name": "weather",
            "databox-type": "driver",
            "resource-requirements": { "store": ["store-json"] }
        }));

        assert_eq!(scalar.stores(), &["store-json".to_string()]);
        assert_eq!(scalar, sequence);
    }

    #[test]
    fn null_store_is_empty() {
        let sla = parse(json!({
            "name": "weather",
            "resource-requirements": { "store": null }
        }));
        assert!(sla.stores().is_empty());
    }

    #[test]
    fn normalization_sets_local_name_from_repo_tag() {
        let sla = parse(json!({ "name": "databoxsystems/driver-twitter:0.5.1" }))
            .normalized()
            .unwrap();
        assert_eq!(sla.local_name(), "driver-twitter");
        assert_eq!(sla.network_name(), "driver-twitter-network");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = parse(json!({ "name": "app-a", "databox-type": "app" }))
            .normalized()
            .unwrap();
        let twice = once.clone().normalized().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn explicit_local_name_is_kept() {
        let sla = parse(json!({ "name": "app-a", "localContainerName": "custom" }))
            .normalized()
            .unwrap();
        assert_eq!(sla.local_name(), "custom");
    }

    #[test]
    fn workload_type_validation() {
        let missing = parse(json!({ "name": "x" }));
        assert!(matches!(
            missing.workload_type(),
            Err(ManifestError::MissingType(_))
        ));

        let unknown = parse(json!({ "name": "x", "databox-type": "daemon" }));
        assert!(matches!(
            unknown.workload_type(),
            Err(ManifestError::UnsupportedType { .. })
        ));

        let app = parse(json!({ "name": "x", "databox-type": "app" }));
        assert_eq!(app.workload_type().unwrap(), DataboxType::App);
    }

    #[test]
    fn actuator_detection() {
        let item: CatalogueItem = serde_json::from_value(json!({
            "href": "https://driver-phillips-hue-store-json:8080/light-1",
            "item-metadata": [
                { "rel": "urn:X-hypercat:rels:hasDescription:en", "val": "A light" },
                { "rel": ACTUATOR_REL, "val": true }
            ]
        }))
        .unwrap();
        assert!(item.is_actuator());

        let sensor: CatalogueItem = serde_json::from_value(json!({
            "href": "https://store:8080/temp",
            "item-metadata": [{ "rel": ACTUATOR_REL, "val": "true" }]
        }))
        .unwrap();
        assert!(!sensor.is_actuator());
    }

    #[test]
    fn unknown_fields_round_trip() {
        let raw = json!({
            "name": "app-a",
            "databox-type": "app",
            "author": "someone",
            "resource-requirements": { "store": ["store-json"], "cpu": 1 }
        });
        let sla = parse(raw.clone());
        assert_eq!(serde_json::to_value(&sla).unwrap(), raw);
    }

    #[test]
    fn store_identities() {
        let sla = parse(json!({
            "name": "weather",
            "resource-requirements": { "store": ["store-json", "store-timeseries"] }
        }))
        .normalized()
        .unwrap();

        assert_eq!(
            sla.store_service_names(),
            vec!["weather-store-json", "weather-store-timeseries"]
        );
        let identity = sla.store_identity("store-json");
        assert_eq!(identity.local_name, "weather-store-json");
        assert_eq!(identity.databox_type, DataboxType::Store);
    }

    #[test]
    fn repo_tag_parsing() {
        assert_eq!(repo_tag_to_name("weather").unwrap(), "weather");
        assert_eq!(repo_tag_to_name("reg:5000/org/app-x:dev").unwrap(), "app-x");
        assert!(repo_tag_to_name("").is_err());
    }
}
