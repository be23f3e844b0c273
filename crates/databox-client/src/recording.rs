//! In-process collaborators that record every call.
//!
//! Used by the daemon's offline mode and by tests. Failures can be injected
//! by matching on the call.

use std::sync::{Mutex, MutexGuard};

use databox_manifest::PermissionGrant;

use crate::ClientFuture;
use crate::error::ClientError;
use crate::netctl::NetworkControl;
use crate::policy::{ContainerRegistration, PolicyEngine};

/// A recorded policy-engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCall {
    Upsert(ContainerRegistration),
    Grant(PermissionGrant),
    Delete(String),
}

type PolicyMatcher = Box<dyn Fn(&PolicyCall) -> bool + Send + Sync>;

/// Recording [`PolicyEngine`].
#[derive(Default)]
pub struct RecordingPolicyEngine {
    calls: Mutex<Vec<PolicyCall>>,
    failing: Mutex<Vec<PolicyMatcher>>,
}

impl RecordingPolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject (after recording) every call matching `matcher`.
    pub fn fail_when(&self, matcher: impl Fn(&PolicyCall) -> bool + Send + Sync + 'static) {
        lock(&self.failing).push(Box::new(matcher));
    }

    pub fn calls(&self) -> Vec<PolicyCall> {
        lock(&self.calls).clone()
    }

    pub fn grants(&self) -> Vec<PermissionGrant> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                PolicyCall::Grant(g) => Some(g.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn registrations(&self) -> Vec<ContainerRegistration> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                PolicyCall::Upsert(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deletions(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                PolicyCall::Delete(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PolicyCall) -> Result<(), ClientError> {
        let rejected = lock(&self.failing).iter().any(|m| m(&call));
        let description = format!("{call:?}");
        lock(&self.calls).push(call);
        if rejected {
            return Err(ClientError::Rejected(format!("injected failure: {description}")));
        }
        Ok(())
    }
}

impl PolicyEngine for RecordingPolicyEngine {
    fn upsert_container_info<'a>(
        &'a self,
        registration: &'a ContainerRegistration,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move { self.record(PolicyCall::Upsert(registration.clone())) })
    }

    fn grant_container_permissions<'a>(
        &'a self,
        grant: &'a PermissionGrant,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move { self.record(PolicyCall::Grant(grant.clone())) })
    }

    fn delete_container_info<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move { self.record(PolicyCall::Delete(name.to_string())) })
    }
}

/// A recorded network-control call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetCall {
    Connect { name: String, peers: Vec<String> },
    Disconnect { name: String, ip: String },
    Privileged { src_ip: String },
}

type NetMatcher = Box<dyn Fn(&NetCall) -> bool + Send + Sync>;

/// Recording [`NetworkControl`].
#[derive(Default)]
pub struct RecordingNetworkControl {
    calls: Mutex<Vec<NetCall>>,
    failing: Mutex<Vec<(NetMatcher, u32)>>,
}

impl RecordingNetworkControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `times` calls matching `matcher`.
    pub fn fail_when(
        &self,
        matcher: impl Fn(&NetCall) -> bool + Send + Sync + 'static,
        times: u32,
    ) {
        lock(&self.failing).push((Box::new(matcher), times));
    }

    pub fn calls(&self) -> Vec<NetCall> {
        lock(&self.calls).clone()
    }

    /// `(name, peers)` of every connect call.
    pub fn connections(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                NetCall::Connect { name, peers } => Some((name.clone(), peers.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: NetCall) -> Result<(), ClientError> {
        let rejected = {
            let mut failing = lock(&self.failing);
            match failing.iter_mut().find(|(m, left)| *left > 0 && m(&call)) {
                Some((_, left)) => {
                    *left -= 1;
                    true
                }
                None => false,
            }
        };
        let description = format!("{call:?}");
        lock(&self.calls).push(call);
        if rejected {
            return Err(ClientError::Rejected(format!("injected failure: {description}")));
        }
        Ok(())
    }
}

impl NetworkControl for RecordingNetworkControl {
    fn connect<'a>(&'a self, name: &'a str, peers: &'a [String]) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.record(NetCall::Connect {
                name: name.to_string(),
                peers: peers.to_vec(),
            })
        })
    }

    fn disconnect<'a>(&'a self, name: &'a str, ip: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.record(NetCall::Disconnect {
                name: name.to_string(),
                ip: ip.to_string(),
            })
        })
    }

    fn privileged<'a>(&'a self, src_ip: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.record(NetCall::Privileged {
                src_ip: src_ip.to_string(),
            })
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
