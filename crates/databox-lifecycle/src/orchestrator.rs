//! The lifecycle orchestrator.

use std::collections::{BTreeMap, BTreeSet};

use databox_backend::{ContainerFilter, ContainerInfo, LabelSelector, ServiceInfo, TaskInfo};
use databox_client::best_effort;
use databox_credentials::CredentialProvisioner;
use databox_manifest::{
    DataboxType, LABEL_SWARM_SERVICE, LABEL_TYPE, ManifestCompiler, ServiceSpec, Sla,
    WorkloadIdentity,
};
use databox_network::{ServiceNetwork, TeardownOutcome, TopologyManager};
use databox_permissions::{derive, push_all};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::error::{LifecycleError, LifecycleResult, StepFailure};
use crate::phase::{PhaseTable, WorkloadPhase};

/// What bootstrap found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub control_service: String,
    /// The orchestrator's address registered as privileged, if found.
    pub privileged_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Primary service first, then its dependent stores.
    pub services: Vec<String>,
    /// Services that were already running and kept their credentials.
    pub adopted: Vec<String>,
    pub failures: Vec<StepFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstallReport {
    /// Services removed, primary first.
    pub removed: Vec<String>,
    /// `None` when no network could be resolved.
    pub network: Option<TeardownOutcome>,
    pub failures: Vec<StepFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestartReport {
    /// Ids of the task containers removed.
    pub removed: Vec<String>,
    pub failures: Vec<StepFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: Vec<InstallReport>,
    /// `(workload, error)` of every install that failed.
    pub failed: Vec<(String, String)>,
}

pub struct Orchestrator {
    ctx: EngineContext,
    compiler: ManifestCompiler,
    topology: TopologyManager,
    credentials: CredentialProvisioner,
    phases: PhaseTable,
}

impl Orchestrator {
    pub fn new(ctx: EngineContext) -> Self {
        let settings = &ctx.settings;
        let compiler = ManifestCompiler::new(settings.compiler.clone());
        let topology = TopologyManager::new(
            ctx.backend.clone(),
            ctx.network_control.clone(),
            settings.topology.clone(),
        );
        let credentials = CredentialProvisioner::new(
            ctx.backend.clone(),
            ctx.policy.clone(),
            ctx.minter.clone(),
            settings.credentials.clone(),
        );
        Self {
            compiler,
            topology,
            credentials,
            phases: PhaseTable::new(),
            ctx,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn phase(&self, name: &str) -> Option<WorkloadPhase> {
        self.phases.get(name)
    }

    pub fn phases(&self) -> BTreeMap<String, WorkloadPhase> {
        self.phases.snapshot()
    }

    // ── Bootstrap ──────────────────────────────────────────────────

    /// Check the backend, identify the network-control container, make
    /// sure the root CA secret exists and register the orchestrator as
    /// privileged with the network-control service.
    ///
    /// Only the privileged registration is allowed to fail.
    pub async fn bootstrap(&self) -> LifecycleResult<BootstrapReport> {
        self.ctx.backend.ping().await?;
        let control_service = self.topology.identify_control_service().await?.to_string();
        self.credentials.ensure_root_ca_secret().await?;

        let privileged_ip = match self.topology.register_privileged().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(error = %e, "privileged registration failed");
                None
            }
        };
        info!(control = %control_service, privileged = ?privileged_ip, "engine bootstrapped");

        Ok(BootstrapReport {
            control_service,
            privileged_ip,
        })
    }

    // ── Install ────────────────────────────────────────────────────

    /// Install a workload and its dependent stores.
    ///
    /// Manifest, topology, network and credential errors abort the install.
    /// Submission, policy and persistence failures are reported in the
    /// result.
    ///
    /// Services that already exist are left as they are: their secrets,
    /// token and registration stay, and only the network, peer and grant
    /// steps are replayed for them.
    pub async fn install(&self, sla: Sla) -> LifecycleResult<InstallReport> {
        let sla = sla.normalized()?;
        let kind = self.compiler.validate(&sla)?;
        let grants = derive(&sla, &self.ctx.settings.permissions)?;
        let name = sla.local_name().to_string();
        let guard = self.phases.begin(&name, WorkloadPhase::Installing)?;
        info!(workload = %name, %kind, stores = sla.stores().len(), "installing");

        let running = self.running_services(&sla).await?;
        let topology = self.topology.reserve(&sla).await?;
        let compiled = self.compiler.compile(&sla, &topology)?;

        let mut failures = Vec::new();
        let identity = WorkloadIdentity {
            local_name: name.clone(),
            databox_type: kind,
        };
        let primary = if running.contains(&compiled.primary.name) {
            None
        } else {
            Some(
                self.provision(compiled.primary.clone(), &identity, &mut failures)
                    .await?,
            )
        };
        let mut dependents = Vec::with_capacity(compiled.dependents.len());
        for (spec, store_type) in compiled.dependents.iter().zip(sla.stores()) {
            if running.contains(&spec.name) {
                continue;
            }
            let identity = sla.store_identity(store_type);
            dependents.push(self.provision(spec.clone(), &identity, &mut failures).await?);
        }

        self.topology.connect_workload(&compiled, &sla).await?;
        if let Err(e) = self.ctx.store.put_sla(&sla) {
            failures.push(StepFailure::Persist {
                workload: name.clone(),
                reason: e.to_string(),
            });
        }

        for spec in dependents.iter().chain(primary.as_ref()) {
            if let Some(failure) = self.submit(spec).await {
                failures.push(failure);
            }
        }

        let pushed = push_all(self.ctx.policy.as_ref(), &grants).await;
        failures.extend(pushed.failures().map(|(what, reason)| StepFailure::PolicyPush {
            what: what.to_string(),
            reason: reason.to_string(),
        }));

        for failure in &failures {
            failure.log(&name);
        }
        guard.settle(Some(WorkloadPhase::Running));
        info!(
            workload = %name,
            grants = grants.len(),
            failures = failures.len(),
            "installed"
        );

        Ok(InstallReport {
            services: compiled.service_names(),
            adopted: running.into_iter().collect(),
            failures,
        })
    }

    /// Services of `sla`, primary or store, that the backend already runs.
    async fn running_services(&self, sla: &Sla) -> LifecycleResult<BTreeSet<String>> {
        let mut names = vec![sla.local_name().to_string()];
        names.extend(sla.store_service_names());

        let mut running = BTreeSet::new();
        for service in names {
            match self.ctx.backend.inspect_service(&service).await {
                Ok(_) => {
                    info!(%service, "service already running, keeping its credentials");
                    running.insert(service);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(running)
    }

    async fn provision(
        &self,
        spec: ServiceSpec,
        identity: &WorkloadIdentity,
        failures: &mut Vec<StepFailure>,
    ) -> LifecycleResult<ServiceSpec> {
        let provisioned = self.credentials.provision(spec, identity).await?;
        failures.extend(provisioned.report.failures().map(|(task, reason)| {
            StepFailure::BackendSubmission {
                service: identity.local_name.clone(),
                reason: format!("{task}: {reason}"),
            }
        }));
        if let Err(reason) = provisioned.registration {
            failures.push(StepFailure::PolicyPush {
                what: format!("register {}", identity.local_name),
                reason,
            });
        }
        Ok(provisioned.spec)
    }

    async fn submit(&self, spec: &ServiceSpec) -> Option<StepFailure> {
        match self.ctx.backend.create_service(spec).await {
            Ok(id) => {
                info!(service = %spec.name, %id, "service submitted");
                None
            }
            Err(e) => Some(StepFailure::BackendSubmission {
                service: spec.name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    // ── Uninstall ──────────────────────────────────────────────────

    /// Remove a workload, its dependent stores, their secrets, policy
    /// identities and, when nothing else uses it, its network. The
    /// persisted manifest is deleted last.
    ///
    /// Fails only when nothing is known about `name`.
    pub async fn uninstall(&self, name: &str) -> LifecycleResult<UninstallReport> {
        let guard = self.phases.begin(name, WorkloadPhase::Uninstalling)?;
        let sla = self.ctx.store.get_sla(name)?;
        let exists = match self.ctx.backend.inspect_service(name).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.into()),
        };
        if !exists && sla.is_none() {
            return Err(LifecycleError::NotInstalled(name.to_string()));
        }
        info!(workload = %name, "uninstalling");

        let mut departing = vec![name.to_string()];
        departing.extend(sla.as_ref().map(Sla::store_service_names).unwrap_or_default());
        let mut failures = Vec::new();

        let attachments = self.resolve_networks(&departing, &mut failures).await;

        let mut removed = Vec::new();
        for service in &departing {
            match self.ctx.backend.remove_service(service).await {
                Ok(()) => removed.push(service.clone()),
                Err(e) if e.is_not_found() => debug!(%service, "service already gone"),
                Err(e) => failures.push(StepFailure::Teardown {
                    service: service.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        for service in &departing {
            let revoked = self.credentials.revoke(service).await;
            failures.extend(revoked.failures().map(|(task, reason)| StepFailure::Teardown {
                service: service.clone(),
                reason: format!("{task}: {reason}"),
            }));
        }

        let deletions = departing
            .iter()
            .map(|service| {
                (
                    format!("delete {service}"),
                    self.ctx.policy.delete_container_info(service),
                )
            })
            .collect();
        let deleted = best_effort(deletions).await;
        failures.extend(deleted.failures().map(|(what, reason)| StepFailure::PolicyPush {
            what: what.to_string(),
            reason: reason.to_string(),
        }));

        let network = match attachments.split_first() {
            Some((first, rest)) => {
                for other in rest {
                    self.topology.release(other).await;
                }
                let outcome = self.topology.teardown(first, &departing).await;
                if let TeardownOutcome::Failed(reason) = &outcome {
                    failures.push(StepFailure::Teardown {
                        service: first.network.clone(),
                        reason: reason.clone(),
                    });
                }
                Some(outcome)
            }
            None => None,
        };

        if let Err(e) = self.ctx.store.delete_sla(name) {
            failures.push(StepFailure::Persist {
                workload: name.to_string(),
                reason: e.to_string(),
            });
        }
        for failure in &failures {
            failure.log(name);
        }
        guard.settle(None);
        info!(workload = %name, removed = removed.len(), failures = failures.len(), "uninstalled");

        Ok(UninstallReport {
            removed,
            network,
            failures,
        })
    }

    /// Live network attachment of every departing service that still has one.
    async fn resolve_networks(
        &self,
        services: &[String],
        failures: &mut Vec<StepFailure>,
    ) -> Vec<ServiceNetwork> {
        let mut attachments = Vec::new();
        for service in services {
            match self.topology.network_of_service(service).await {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => {
                    debug!(%service, error = %e, "no network to tear down");
                    if service == &services[0] {
                        failures.push(StepFailure::Teardown {
                            service: service.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        attachments
    }

    // ── Restart ────────────────────────────────────────────────────

    /// Force-remove every task container of `name`; the backend starts
    /// replacements.
    pub async fn restart(&self, name: &str) -> LifecycleResult<RestartReport> {
        let guard = self.phases.begin(name, WorkloadPhase::Restarting)?;
        let previous = guard.previous();

        let filter = ContainerFilter::by_label(LabelSelector::equals(LABEL_SWARM_SERVICE, name));
        let containers = self.ctx.backend.list_containers(&filter).await?;
        let tasks = containers
            .iter()
            .map(|c| (c.id.clone(), self.ctx.backend.remove_container(&c.id, true)))
            .collect();
        let outcome = best_effort(tasks).await;

        let mut report = RestartReport::default();
        for task in &outcome.outcomes {
            match &task.result {
                Ok(()) => report.removed.push(task.label.clone()),
                Err(reason) => report.failures.push(StepFailure::BackendSubmission {
                    service: name.to_string(),
                    reason: format!("removing container {}: {reason}", task.label),
                }),
            }
        }
        for failure in &report.failures {
            failure.log(name);
        }

        guard.settle(previous);
        info!(workload = %name, removed = report.removed.len(), "restarted");
        Ok(report)
    }

    // ── Restore ────────────────────────────────────────────────────

    /// Install each manifest in turn. Each install, submission included,
    /// completes before the next starts; a failed install does not stop the
    /// rest.
    pub async fn restore_all(&self, slas: Vec<Sla>) -> RestoreReport {
        let total = slas.len();
        let report = stream::iter(slas)
            .fold(RestoreReport::default(), |mut report, sla| async move {
                let name = sla.local_name().to_string();
                match self.install(sla).await {
                    Ok(installed) => report.restored.push(installed),
                    Err(e) => {
                        error!(workload = %name, error = %e, "restore failed");
                        report.failed.push((name, e.to_string()));
                    }
                }
                report
            })
            .await;
        info!(
            total,
            restored = report.restored.len(),
            failed = report.failed.len(),
            "restore finished"
        );
        report
    }

    /// Restore every persisted manifest.
    pub async fn restore_persisted(&self) -> LifecycleResult<RestoreReport> {
        let slas = self.ctx.store.list_slas()?;
        Ok(self.restore_all(slas).await)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Workload services, optionally of one type.
    pub async fn list_services(&self, kind: Option<DataboxType>) -> LifecycleResult<Vec<ServiceInfo>> {
        let selector = match kind {
            Some(kind) => LabelSelector::equals(LABEL_TYPE, kind.as_str()),
            None => LabelSelector::present(LABEL_TYPE),
        };
        Ok(self.ctx.backend.list_services(&[selector]).await?)
    }

    pub async fn list_tasks(&self, service: &str) -> LifecycleResult<Vec<TaskInfo>> {
        Ok(self.ctx.backend.list_tasks(service).await?)
    }

    /// Every container belonging to a workload.
    pub async fn list_containers(&self) -> LifecycleResult<Vec<ContainerInfo>> {
        let filter = ContainerFilter::by_label(LabelSelector::present(LABEL_TYPE));
        Ok(self.ctx.backend.list_containers(&filter).await?)
    }

    /// Manifests of every installed workload.
    pub fn get_active_slas(&self) -> LifecycleResult<Vec<Sla>> {
        Ok(self.ctx.store.list_slas()?)
    }
}
