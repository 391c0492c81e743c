//! Local Key-Value Store adapters.
//!
//! The engine only needs a durable string-to-string map. [`RedbStore`] keeps
//! it in a single redb table and survives restarts; [`MemoryStore`] is the
//! ephemeral variant used by tests and throwaway sessions.
//!
//! Keys written by the engine:
//! - `offline_<kind>:<owner_id>` one cached collection per kind and owner
//! - `sync_queue` the global mutation queue
//! - `guest_mode` guest flag (`"true"` when active)
//! - `user_profile` the fabricated guest profile

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::SyncError;

mod memory;

pub use memory::MemoryStore;

/// Fixed Local Store keys
pub mod keys {
    pub const SYNC_QUEUE: &str = "sync_queue";
    pub const GUEST_MODE: &str = "guest_mode";
    pub const USER_PROFILE: &str = "user_profile";
    /// Temporary id -> server id for every confirmed create
    pub const ID_REMAPS: &str = "id_remaps";
}

/// Durable string-keyed storage the engine writes through to.
///
/// Each call is atomic on its own; callers that read-modify-write a key
/// serialize themselves.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), SyncError>;

    /// Remove several keys in one atomic step
    fn remove_all(&self, keys: &[String]) -> Result<(), SyncError>;

    /// Drop every key
    fn clear(&self) -> Result<(), SyncError>;
}

impl<T: LocalStore + ?Sized> LocalStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        (**self).remove(key)
    }

    fn remove_all(&self, keys: &[String]) -> Result<(), SyncError> {
        (**self).remove_all(keys)
    }

    fn clear(&self) -> Result<(), SyncError> {
        (**self).clear()
    }
}

const KV_TABLE: TableDefinition<&str, &str> = TableDefinition::new("kv");

/// Local Store backed by redb
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<RwLock<Database>>,
}

impl RedbStore {
    /// Open (or create) the store at the given path.
    ///
    /// Creates the parent directory and the key-value table if needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(KV_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Number of stored keys
    pub fn len(&self) -> Result<u64, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(KV_TABLE)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, SyncError> {
        Ok(self.len()? == 0)
    }
}

impl LocalStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(KV_TABLE)?;

        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove_all(&self, keys: &[String]) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            for key in keys {
                table.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            write_txn.delete_table(KV_TABLE)?;
            let _ = write_txn.open_table(KV_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RedbStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let store = RedbStore::new(&db_path).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_store_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let store = RedbStore::new(&db_path);
        assert!(store.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_set_get_remove() {
        let (store, _temp) = create_test_store();

        assert!(store.get("offline_tasks:u").unwrap().is_none());

        store.set("offline_tasks:u", "[]").unwrap();
        assert_eq!(store.get("offline_tasks:u").unwrap().as_deref(), Some("[]"));

        store.set("offline_tasks:u", "[1]").unwrap();
        assert_eq!(store.get("offline_tasks:u").unwrap().as_deref(), Some("[1]"));

        store.remove("offline_tasks:u").unwrap();
        assert!(store.get("offline_tasks:u").unwrap().is_none());

        // Removing again is fine
        store.remove("offline_tasks:u").unwrap();
    }

    #[test]
    fn test_remove_all_and_clear() {
        let (store, _temp) = create_test_store();

        store.set(keys::GUEST_MODE, "true").unwrap();
        store.set(keys::USER_PROFILE, "{}").unwrap();
        store.set(keys::SYNC_QUEUE, "[]").unwrap();
        assert_eq!(store.len().unwrap(), 3);

        store
            .remove_all(&[keys::GUEST_MODE.to_string(), keys::USER_PROFILE.to_string()])
            .unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.get(keys::SYNC_QUEUE).unwrap().is_some());

        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
        // Table is usable after clear
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_values_persist_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");

        {
            let store = RedbStore::new(&db_path).unwrap();
            store.set(keys::SYNC_QUEUE, "[{\"id\":\"sync_1\"}]").unwrap();
        }

        {
            let store = RedbStore::new(&db_path).unwrap();
            assert_eq!(
                store.get(keys::SYNC_QUEUE).unwrap().as_deref(),
                Some("[{\"id\":\"sync_1\"}]")
            );
        }
    }
}
