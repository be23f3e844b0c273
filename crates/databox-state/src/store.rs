//! StateStore — redb-backed persistence of installed manifests.
//!
//! Values are the normalized SLA serialized as JSON. The store supports both
//! on-disk and in-memory backends (the latter for tests and the daemon's
//! ephemeral mode).

use std::path::Path;
use std::sync::Arc;

use databox_manifest::Sla;
use redb::{Database, ReadableDatabase, ReadableTable, StorageBackend};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::SLAS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe SLA store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let store = Self::open_with_backend(redb::backends::InMemoryBackend::new())?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Open a store on a caller-supplied redb storage backend.
    pub fn open_with_backend(backend: impl StorageBackend) -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SLAS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── SLAs ───────────────────────────────────────────────────────

    /// Insert or replace the record for `sla.local_name()`.
    pub fn put_sla(&self, sla: &Sla) -> StateResult<()> {
        let key = sla.local_name();
        let value = serde_json::to_vec(sla).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SLAS).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "sla stored");
        Ok(())
    }

    /// Get the record for a workload name.
    pub fn get_sla(&self, name: &str) -> StateResult<Option<Sla>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SLAS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => decode(name, guard.value()).map(Some),
            None => Ok(None),
        }
    }

    /// List every stored SLA in key order.
    ///
    /// Records that no longer parse are skipped with a warning so a single
    /// bad entry cannot block a restore.
    pub fn list_slas(&self) -> StateResult<Vec<Sla>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SLAS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            match decode(key.value(), value.value()) {
                Ok(sla) => results.push(sla),
                Err(e) => warn!(key = %key.value(), error = %e, "skipping unreadable sla"),
            }
        }
        Ok(results)
    }

    /// Delete a record. Returns true if it existed.
    pub fn delete_sla(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SLAS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, existed, "sla deleted");
        Ok(existed)
    }

    /// Store a raw JSON record, bypassing schema checks.
    #[cfg(test)]
    fn put_raw(&self, key: &str, value: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SLAS).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

fn decode(key: &str, bytes: &[u8]) -> StateResult<Sla> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
