//! databox-lifecycle — the workload lifecycle state machine.
//!
//! The [`Orchestrator`] sequences the manifest compiler, the topology
//! manager, the credential provisioner and the permission deriver into the
//! four lifecycle operations, and owns the per-workload phase table that
//! keeps one logical actor per workload name.
//!
//! # Architecture
//!
//! ```text
//! EngineContext (backend, policy engine, network control, CA, SLA store)
//!   └── Orchestrator
//!         ├── install(sla)      compile → reserve → provision → connect
//!         │                     → persist → submit → grant
//!         ├── uninstall(name)   resolve → remove → revoke → teardown → forget
//!         ├── restart(name)     force-remove task containers
//!         └── restore_all(slas) sequential fold over install
//!
//! absent ──install──▶ installing ──▶ running ──uninstall──▶ uninstalling ──▶ absent
//!                                      │  ▲
//!                               restart ▼  │
//!                                   restarting
//! ```
//!
//! Failures before any externally visible resource exists are returned.
//! Later failures are collected as [`StepFailure`]s, logged, and reported
//! next to the result.

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod phase;

pub use context::{EngineContext, EngineSettings};
pub use error::{LifecycleError, LifecycleResult, StepFailure};
pub use orchestrator::{
    BootstrapReport, InstallReport, Orchestrator, RestartReport, RestoreReport, UninstallReport,
};
pub use phase::{PhaseGuard, PhaseTable, WorkloadPhase};
