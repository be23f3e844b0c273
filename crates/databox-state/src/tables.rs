//! redb table definitions.

use redb::TableDefinition;

/// Installed manifests keyed by workload name. Values are JSON.
pub const SLAS: TableDefinition<&str, &[u8]> = TableDefinition::new("slas");
