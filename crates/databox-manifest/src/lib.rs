//! databox-manifest — typed workload manifests and the manifest compiler.
//!
//! An SLA (service level agreement) is the declarative manifest describing
//! an app, driver or store workload. This crate holds the shared data model
//! used by every other engine crate and the pure compiler that turns a
//! manifest plus a resolved network topology into backend service specs.
//!
//! # Architecture
//!
//! ```text
//! Sla (JSON manifest, normalized on parse)
//!   └── ManifestCompiler::compile(sla, topology)
//!         ├── primary ServiceSpec   (app / driver)
//!         └── dependent ServiceSpec (one per requested store type)
//! ```
//!
//! `PermissionGrant` and `NetworkTopology` also live here because they are
//! exchanged between the network, credential, permission and lifecycle
//! crates.

pub mod compile;
pub mod error;
pub mod grant;
pub mod image;
pub mod sla;
pub mod spec;
pub mod topology;

pub use compile::{CompiledWorkload, CompilerSettings, ManifestCompiler};
pub use error::{ManifestError, ManifestResult};
pub use grant::{HttpMethod, PermissionGrant, Route};
pub use image::ImageSettings;
pub use sla::*;
pub use spec::*;
pub use topology::NetworkTopology;
