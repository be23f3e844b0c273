//! databox-state — persistent SLA store.
//!
//! Backed by [redb](https://docs.rs/redb). One JSON record per installed
//! workload, keyed by its local container name, so that the daemon can replay
//! every install after a restart.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
