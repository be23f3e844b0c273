//! databox-client — the engine's two narrow HTTP collaborators.
//!
//! The policy engine ("arbiter") holds workload identities, tokens and
//! capability grants. The network-control service attaches its DNS/control
//! container to workload networks and mediates peer connectivity. Both are
//! reached over HTTPS with an `x-api-key` header and modelled as
//! object-safe traits so the orchestrator can run against recording fakes.
//!
//! # Architecture
//!
//! ```text
//! PolicyEngine ──── ArbiterClient ─────────┐
//!                                          ├── ApiClient (hyper http1 + tokio-rustls)
//! NetworkControl ── NetworkControlClient ──┘
//!
//! RecordingPolicyEngine / RecordingNetworkControl — in-process fakes
//! best_effort(tasks) → BatchReport — concurrent, non-cancelling fan-out
//! ```

pub mod api;
pub mod batch;
pub mod error;
pub mod netctl;
pub mod policy;
pub mod recording;

pub use api::{ApiClient, load_api_key, tls_config_from_pem};
pub use batch::{BatchReport, TaskOutcome, best_effort, best_effort_values};
pub use error::{ClientError, ClientResult};
pub use netctl::{NetworkControl, NetworkControlClient};
pub use policy::{ArbiterClient, ContainerRegistration, PolicyEngine};
pub use recording::{NetCall, PolicyCall, RecordingNetworkControl, RecordingPolicyEngine};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by collaborator operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = ClientResult<T>> + Send + 'a>>;
