//! StateStore — redb-backed state persistence for ModelGrid.
//!
//! Provides typed CRUD for model versions and a generic JSON record API
//! over the deployment, A/B test, breach, threshold, update, and schedule
//! tables.
//! The store supports both on-disk and in-memory backends (the latter
//! for testing).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::ModelVersion;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Persistent collaborator behind the version store.
///
/// `put_versions` and `delete_versions` must be atomic: either every record
/// is written (or removed) or none.
pub trait VersionBackend: Send + Sync {
    fn get_version(&self, key: &str) -> StateResult<Option<ModelVersion>>;
    fn put_versions(&self, versions: &[ModelVersion]) -> StateResult<()>;
    fn delete_versions(&self, keys: &[String]) -> StateResult<()>;
    fn list_versions_for_model(&self, name: &str) -> StateResult<Vec<ModelVersion>>;
    fn list_version_models(&self) -> StateResult<Vec<String>>;
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(AB_TESTS).map_err(map_err!(Table))?;
        txn.open_table(BREACHES).map_err(map_err!(Table))?;
        txn.open_table(THRESHOLDS).map_err(map_err!(Table))?;
        txn.open_table(UPDATES).map_err(map_err!(Table))?;
        txn.open_table(SCHEDULES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic records ────────────────────────────────────────────

    /// Insert or update a JSON record.
    pub fn put_record<T: Serialize>(&self, table: Table, key: &str, record: &T) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table.definition()).map_err(map_err!(Table))?;
            t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(?table, %key, "record stored");
        Ok(())
    }

    /// Get a record by key.
    pub fn get_record<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table.definition()).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List every record in a table, in key order.
    pub fn list_records<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        self.list_records_with_prefix(table, "")
    }

    /// List records whose key starts with `prefix`, in key order.
    pub fn list_records_with_prefix<T: DeserializeOwned>(
        &self,
        table: Table,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table.definition()).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Delete a record by key. Returns true if it existed.
    pub fn delete_record(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table.definition()).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(?table, %key, existed, "record deleted");
        Ok(existed)
    }
}

// ── Versions ───────────────────────────────────────────────────────

impl VersionBackend for StateStore {
    fn get_version(&self, key: &str) -> StateResult<Option<ModelVersion>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let version: ModelVersion =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    fn put_versions(&self, versions: &[ModelVersion]) -> StateResult<()> {
        let mut encoded = Vec::with_capacity(versions.len());
        for version in versions {
            let value = serde_json::to_vec(version).map_err(map_err!(Serialize))?;
            encoded.push((version.table_key(), value));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            for (key, value) in &encoded {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = encoded.len(), "versions stored");
        Ok(())
    }

    fn delete_versions(&self, keys: &[String]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            for key in keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = keys.len(), "versions deleted");
        Ok(())
    }

    fn list_versions_for_model(&self, name: &str) -> StateResult<Vec<ModelVersion>> {
        let prefix = format!("{name}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let version: ModelVersion =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(version);
            }
        }
        Ok(results)
    }

    fn list_version_models(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        let mut names = BTreeSet::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some((name, _)) = key.value().split_once('/') {
                names.insert(name.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }
}
