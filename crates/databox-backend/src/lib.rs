//! databox-backend — the container orchestration backend as a capability.
//!
//! The engine never talks to Docker directly. Every service, secret, network,
//! task and container operation goes through the object-safe
//! [`ContainerBackend`] trait so the orchestrator can be driven against a
//! real swarm or the in-process simulator.
//!
//! # Architecture
//!
//! ```text
//! ContainerBackend (trait, boxed futures)
//!   ├── DockerBackend  — Docker Engine HTTP API over /var/run/docker.sock
//!   └── MemoryBackend  — in-process swarm: services → tasks → containers,
//!                        overlay networks with IP allocation, labeled
//!                        secrets, call log + failure injection
//! ```

pub mod backend;
pub mod docker;
pub mod error;
pub mod memory;
pub mod types;

pub use backend::{BackendFuture, ContainerBackend};
pub use docker::DockerBackend;
pub use error::{BackendError, BackendResult};
pub use memory::{BackendCall, MemoryBackend};
pub use types::*;
