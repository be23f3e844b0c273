//! databox-permissions — the capability grants a workload needs.
//!
//! Derivation is a pure function of the manifest: export routes for the
//! export whitelist, read (and actuator write) routes for each datasource,
//! and the store routes every dependent store needs. Pushing is
//! best-effort: each grant goes to the policy engine independently and
//! failures are only logged.
//!
//! ```text
//! derive(sla, ctx) → Vec<PermissionGrant>
//!   ├── export whitelist   (apps)  POST /export/, /lp/export/
//!   ├── datasources        (apps)  GET /status /<ds> /<ds>/* /ws /sub/<ds>/*
//!   │                               POST /<ds>/* when actuator
//!   └── dependent stores   (all)   orchestrator GET /cat, owner store routes
//! push_all(policy, grants) → BatchReport
//! ```

pub mod derive;
pub mod push;

pub use derive::{PermissionContext, derive, export_caveat};
pub use push::push_all;
