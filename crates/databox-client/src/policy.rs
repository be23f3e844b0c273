//! Policy engine ("arbiter") capability.

use databox_manifest::{DataboxType, PermissionGrant};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::ClientFuture;
use crate::api::ApiClient;

pub const UPSERT_PATH: &str = "/cm/upsert-container-info";
pub const GRANT_PATH: &str = "/cm/grant-container-permissions";
pub const DELETE_PATH: &str = "/cm/delete-container-info";

/// Identity registration of one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRegistration {
    pub name: String,
    /// Arbiter token, base64.
    pub key: String,
    #[serde(rename = "type")]
    pub databox_type: DataboxType,
}

/// Holds per-workload identity, tokens and grants.
pub trait PolicyEngine: Send + Sync {
    fn upsert_container_info<'a>(
        &'a self,
        registration: &'a ContainerRegistration,
    ) -> ClientFuture<'a, ()>;

    fn grant_container_permissions<'a>(&'a self, grant: &'a PermissionGrant)
    -> ClientFuture<'a, ()>;

    fn delete_container_info<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;
}

/// HTTP [`PolicyEngine`].
#[derive(Debug, Clone)]
pub struct ArbiterClient {
    api: ApiClient,
}

impl ArbiterClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

impl PolicyEngine for ArbiterClient {
    fn upsert_container_info<'a>(
        &'a self,
        registration: &'a ContainerRegistration,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.api.post_json(UPSERT_PATH, registration).await?;
            debug!(name = %registration.name, kind = %registration.databox_type, "container registered");
            Ok(())
        })
    }

    fn grant_container_permissions<'a>(
        &'a self,
        grant: &'a PermissionGrant,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.api.post_json(GRANT_PATH, grant).await?;
            debug!(%grant, "permission granted");
            Ok(())
        })
    }

    fn delete_container_info<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.api.post_json(DELETE_PATH, &json!({ "name": name })).await?;
            debug!(%name, "container info deleted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_wire_shape() {
        let reg = ContainerRegistration {
            name: "weather".to_string(),
            key: "dG9rZW4=".to_string(),
            databox_type: DataboxType::Driver,
        };
        assert_eq!(
            serde_json::to_value(&reg).unwrap(),
            json!({ "name": "weather", "key": "dG9rZW4=", "type": "driver" })
        );
    }
}
