//! Resolved network topology of a workload.

use serde::{Deserialize, Serialize};

/// The overlay network a workload runs on and the resolver it uses.
///
/// `dns_ip` is the network-control service's address on that network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub network_name: String,
    pub dns_ip: String,
}
