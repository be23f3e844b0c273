//! CredentialProvisioner — secrets and policy registration per workload.

use std::collections::BTreeMap;
use std::sync::Arc;

use databox_backend::{ContainerBackend, LabelSelector, SecretInfo, SecretSpec};
use databox_client::{
    BatchReport, ContainerRegistration, PolicyEngine, TaskOutcome, best_effort, best_effort_values,
};
use databox_manifest::{LABEL_SERVICE_NAME, SecretMount, ServiceSpec, WorkloadIdentity};
use tracing::{debug, info, warn};

use crate::ca::CertificateMinter;
use crate::error::{CredentialError, CredentialResult};
use crate::token::generate_arbiter_token;

/// Secret holding the platform root certificate.
pub const DEFAULT_ROOT_CA_SECRET: &str = "databox_DATABOX_ROOT_CA";

// File names under /run/secrets/.
pub const ROOT_CA_FILE: &str = "DATABOX_ROOT_CA";
pub const BUNDLE_JSON_FILE: &str = "DATABOX_PEM";
pub const BUNDLE_PEM_FILE: &str = "DATABOX.pem";
pub const TOKEN_FILE: &str = "ARBITER_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSettings {
    pub root_ca_secret: String,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            root_ca_secret: DEFAULT_ROOT_CA_SECRET.to_string(),
        }
    }
}

/// A service spec with its secrets attached.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub spec: ServiceSpec,
    /// Token registered with the policy engine.
    pub token: String,
    /// Outcome of every secret task.
    pub report: BatchReport,
    /// Outcome of the policy-engine registration.
    pub registration: Result<(), String>,
}

pub struct CredentialProvisioner {
    backend: Arc<dyn ContainerBackend>,
    policy: Arc<dyn PolicyEngine>,
    minter: Arc<dyn CertificateMinter>,
    settings: CredentialSettings,
}

impl CredentialProvisioner {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        policy: Arc<dyn PolicyEngine>,
        minter: Arc<dyn CertificateMinter>,
        settings: CredentialSettings,
    ) -> Self {
        Self {
            backend,
            policy,
            minter,
            settings,
        }
    }

    /// Create the root CA secret from the minter's root unless it exists.
    /// Returns its id.
    pub async fn ensure_root_ca_secret(&self) -> CredentialResult<String> {
        let name = &self.settings.root_ca_secret;
        match self.backend.inspect_secret(name).await {
            Ok(existing) => Ok(existing.id),
            Err(e) if e.is_not_found() => {
                let id = self
                    .backend
                    .create_secret(&SecretSpec {
                        name: name.clone(),
                        labels: BTreeMap::new(),
                        data: self.minter.root_certificate_pem().as_bytes().to_vec(),
                    })
                    .await?;
                info!(secret = %name, "root CA secret created");
                Ok(id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mint credentials for `identity`, store them as secrets mounted into
    /// `spec`, and register the identity with the policy engine.
    ///
    /// Fails only before any secret exists (missing root CA, mint or token
    /// failure). Secret and registration failures are logged and reported;
    /// the spec is returned without the mounts that could not be created.
    pub async fn provision(
        &self,
        mut spec: ServiceSpec,
        identity: &WorkloadIdentity,
    ) -> CredentialResult<Provisioned> {
        let name = identity.local_name.as_str();

        let root_ca = match self.backend.inspect_secret(&self.settings.root_ca_secret).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                return Err(CredentialError::RootCaMissing(self.settings.root_ca_secret.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let bundle = self.minter.mint(name)?;
        let token = generate_arbiter_token()?;
        let bundle_json =
            serde_json::to_vec(&bundle).map_err(|e| CredentialError::Encode(e.to_string()))?;

        spec.secrets.push(SecretMount::owner_only(root_ca.id, root_ca.name, ROOT_CA_FILE));

        let upper = name.to_uppercase();
        let labels = BTreeMap::from([(LABEL_SERVICE_NAME.to_string(), name.to_string())]);
        let secrets = [
            (format!("{upper}_PEM"), bundle_json, BUNDLE_JSON_FILE),
            (format!("{upper}.pem"), bundle.to_pem().into_bytes(), BUNDLE_PEM_FILE),
            (format!("{upper}_KEY"), token.clone().into_bytes(), TOKEN_FILE),
        ];
        let files: Vec<&str> = secrets.iter().map(|(_, _, file)| *file).collect();
        let tasks: Vec<_> = secrets
            .into_iter()
            .map(|(secret_name, data, _)| {
                (
                    format!("secret {secret_name}"),
                    self.replace_secret(SecretSpec {
                        name: secret_name,
                        labels: labels.clone(),
                        data,
                    }),
                )
            })
            .collect();

        let registration = ContainerRegistration {
            name: name.to_string(),
            key: token.clone(),
            databox_type: identity.databox_type,
        };
        let ((report, created), registered) = tokio::join!(
            best_effort_values(tasks),
            self.policy.upsert_container_info(&registration)
        );
        let registration = registered.map_err(|e| e.to_string());

        for (secret, file) in created.into_iter().zip(files) {
            if let Some(secret) = secret {
                spec.secrets.push(SecretMount::owner_only(secret.id, secret.name, file));
            }
        }
        for (task, error) in report.failures() {
            warn!(workload = %name, %task, %error, "secret creation failed");
        }
        if let Err(error) = &registration {
            warn!(workload = %name, %error, "policy registration failed");
        }
        debug!(workload = %name, secrets = spec.secrets.len(), "credentials provisioned");

        Ok(Provisioned {
            spec,
            token,
            report,
            registration,
        })
    }

    /// Remove every secret labeled with `service`.
    pub async fn revoke(&self, service: &str) -> BatchReport {
        let selector = [LabelSelector::equals(LABEL_SERVICE_NAME, service)];
        let secrets = match self.backend.list_secrets(&selector).await {
            Ok(secrets) => secrets,
            Err(e) => {
                warn!(%service, error = %e, "cannot list secrets");
                return BatchReport {
                    outcomes: vec![TaskOutcome {
                        label: format!("list secrets of {service}"),
                        result: Err(e.to_string()),
                    }],
                };
            }
        };

        let tasks = secrets
            .iter()
            .map(|s| (format!("remove secret {}", s.name), self.backend.remove_secret(&s.id)))
            .collect();
        let report = best_effort(tasks).await;
        for (task, error) in report.failures() {
            warn!(%service, %task, %error, "secret removal failed");
        }
        report
    }

    /// Create `secret`, removing a previous one of the same name first.
    async fn replace_secret(&self, secret: SecretSpec) -> CredentialResult<SecretInfo> {
        match self.backend.inspect_secret(&secret.name).await {
            Ok(existing) => {
                debug!(secret = %secret.name, "replacing existing secret");
                self.backend.remove_secret(&existing.id).await?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        let id = self.backend.create_secret(&secret).await?;
        Ok(SecretInfo {
            id,
            name: secret.name,
            labels: secret.labels,
        })
    }
}
