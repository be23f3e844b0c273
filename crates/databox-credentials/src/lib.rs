//! databox-credentials — per-workload certificates, tokens and secrets.
//!
//! Every workload gets a client certificate for its local name signed by the
//! platform root CA, a random arbiter token, and backend secrets carrying
//! both. The token is registered with the policy engine in the same
//! best-effort batch that creates the secrets.
//!
//! # Architecture
//!
//! ```text
//! CredentialProvisioner::provision(spec, identity)
//!   ├── CertificateMinter::mint(local name)   (RootCa, rcgen)
//!   ├── generate_arbiter_token()              (32 random bytes, base64)
//!   └── best-effort batch
//!         ├── secret <NAME>_PEM   certificate bundle as JSON
//!         ├── secret <NAME>.pem   concatenated PEM
//!         ├── secret <NAME>_KEY   arbiter token
//!         └── PolicyEngine::upsert_container_info
//! ```

pub mod ca;
pub mod error;
pub mod provision;
pub mod token;

pub use ca::{CertificateBundle, CertificateMinter, RootCa};
pub use error::{CredentialError, CredentialResult};
pub use provision::{CredentialProvisioner, CredentialSettings, Provisioned};
pub use token::generate_arbiter_token;
