//! Per-workload lifecycle phases.
//!
//! A workload with no entry is absent. Transitions are claimed through
//! [`PhaseTable::begin`], which refuses to start a second transition on a
//! workload that is already in one, and settled through the returned
//! [`PhaseGuard`]. A guard dropped without being settled puts the workload
//! back where it was.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::debug;

use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadPhase {
    Installing,
    Running,
    Restarting,
    Uninstalling,
}

impl WorkloadPhase {
    /// Whether a lifecycle operation currently owns the workload.
    pub fn is_transient(self) -> bool {
        !matches!(self, WorkloadPhase::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadPhase::Installing => "installing",
            WorkloadPhase::Running => "running",
            WorkloadPhase::Restarting => "restarting",
            WorkloadPhase::Uninstalling => "uninstalling",
        }
    }
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct PhaseTable {
    phases: Mutex<HashMap<String, WorkloadPhase>>,
}

impl PhaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WorkloadPhase>> {
        self.phases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<WorkloadPhase> {
        self.lock().get(name).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, WorkloadPhase> {
        self.lock()
            .iter()
            .map(|(name, phase)| (name.clone(), *phase))
            .collect()
    }

    /// Claim `name` for a transition into `next`.
    ///
    /// Installing needs an absent workload. Uninstalling and restarting
    /// accept a running or absent one, since the backend may hold services
    /// this process never installed.
    pub fn begin(&self, name: &str, next: WorkloadPhase) -> LifecycleResult<PhaseGuard<'_>> {
        let mut phases = self.lock();
        let current = phases.get(name).copied();
        match (current, next) {
            (Some(phase), _) if phase.is_transient() => {
                return Err(LifecycleError::Busy {
                    name: name.to_string(),
                    phase,
                });
            }
            (Some(WorkloadPhase::Running), WorkloadPhase::Installing) => {
                return Err(LifecycleError::AlreadyInstalled(name.to_string()));
            }
            _ => {}
        }
        phases.insert(name.to_string(), next);
        debug!(workload = %name, from = ?current, to = %next, "phase transition started");

        Ok(PhaseGuard {
            table: self,
            name: name.to_string(),
            fallback: current,
            settled: false,
        })
    }

    fn set(&self, name: &str, phase: Option<WorkloadPhase>) {
        let mut phases = self.lock();
        match phase {
            Some(phase) => {
                phases.insert(name.to_string(), phase);
            }
            None => {
                phases.remove(name);
            }
        }
    }
}

/// An in-flight transition. See the module docs.
#[derive(Debug)]
#[must_use = "dropping the guard reverts the transition"]
pub struct PhaseGuard<'a> {
    table: &'a PhaseTable,
    name: String,
    fallback: Option<WorkloadPhase>,
    settled: bool,
}

impl PhaseGuard<'_> {
    /// Finish the transition in `phase` (`None` for absent).
    pub fn settle(mut self, phase: Option<WorkloadPhase>) {
        self.table.set(&self.name, phase);
        self.settled = true;
    }

    /// Phase before the transition started.
    pub fn previous(&self) -> Option<WorkloadPhase> {
        self.fallback
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(workload = %self.name, "phase transition abandoned");
            self.table.set(&self.name, self.fallback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_uninstall() {
        let table = PhaseTable::new();

        let guard = table.begin("weather", WorkloadPhase::Installing).unwrap();
        assert_eq!(table.get("weather"), Some(WorkloadPhase::Installing));
        guard.settle(Some(WorkloadPhase::Running));
        assert_eq!(table.get("weather"), Some(WorkloadPhase::Running));

        let guard = table.begin("weather", WorkloadPhase::Uninstalling).unwrap();
        guard.settle(None);
        assert_eq!(table.get("weather"), None);
    }

    #[test]
    fn second_transition_is_refused_while_busy() {
        let table = PhaseTable::new();
        let _guard = table.begin("weather", WorkloadPhase::Installing).unwrap();

        let err = table.begin("weather", WorkloadPhase::Restarting).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Busy {
                phase: WorkloadPhase::Installing,
                ..
            }
        ));
        assert!(table.begin("other", WorkloadPhase::Installing).is_ok());
    }

    #[test]
    fn running_workload_cannot_be_installed_again() {
        let table = PhaseTable::new();
        table
            .begin("weather", WorkloadPhase::Installing)
            .unwrap()
            .settle(Some(WorkloadPhase::Running));

        assert!(matches!(
            table.begin("weather", WorkloadPhase::Installing),
            Err(LifecycleError::AlreadyInstalled(_))
        ));
    }

    #[test]
    fn abandoned_transition_reverts() {
        let table = PhaseTable::new();
        drop(table.begin("weather", WorkloadPhase::Installing).unwrap());
        assert_eq!(table.get("weather"), None);

        table
            .begin("weather", WorkloadPhase::Installing)
            .unwrap()
            .settle(Some(WorkloadPhase::Running));
        let guard = table.begin("weather", WorkloadPhase::Restarting).unwrap();
        assert_eq!(guard.previous(), Some(WorkloadPhase::Running));
        drop(guard);
        assert_eq!(table.get("weather"), Some(WorkloadPhase::Running));
    }

    #[test]
    fn absent_workloads_can_be_restarted_or_uninstalled() {
        let table = PhaseTable::new();
        table
            .begin("stray", WorkloadPhase::Restarting)
            .unwrap()
            .settle(None);
        assert!(table.begin("stray", WorkloadPhase::Uninstalling).is_ok());
    }
}
