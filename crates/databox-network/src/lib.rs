//! databox-network — per-workload network isolation.
//!
//! Every workload runs on its own attachable overlay network. The
//! network-control service (a DNS/control container) must sit on each of
//! those networks; its address there is the workload's DNS resolver, and it
//! is asked to open connectivity to exactly the peers a workload's
//! environment names.
//!
//! # Architecture
//!
//! ```text
//! TopologyManager
//!   ├── identify_control_service()  set-once control container name
//!   ├── register_privileged()       orchestrator IP → POST /privileged
//!   ├── reserve(sla)                ensure network → attach control → DNS IP
//!   ├── connect_workload(..)        peers_of_env → POST /connect (retried)
//!   ├── network_of_service(name)    live network + address lookup
//!   └── teardown(..)                disconnect → membership check → remove
//!
//! RetryPolicy — fixed delay, bounded attempts, retryable vs fatal
//! ```

pub mod error;
pub mod peers;
pub mod retry;
pub mod topology;

pub use error::{NetworkError, NetworkResult};
pub use peers::{peers_of_env, to_service_name, url_host};
pub use retry::{RetryError, RetryPolicy, Retryable};
pub use topology::{ServiceNetwork, TeardownOutcome, TopologyManager, TopologySettings};
