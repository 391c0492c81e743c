//! Cached collections.
//!
//! One JSON array of [`Record`]s per (entity kind, owner) pair, stored under
//! [`EntityKind::collection_key`]. Every read-modify-write runs under a lock
//! for that key so concurrent operations on the same collection cannot drop
//! each other's effects.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SyncResult;
use crate::storage::LocalStore;
use crate::types::{EntityKind, Insertion, Record, RecordId};

pub struct CollectionCache {
    store: Arc<dyn LocalStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CollectionCache {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read(&self, key: &str) -> SyncResult<Vec<Record>> {
        match self.store.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, key: &str, records: &[Record]) -> SyncResult<()> {
        let raw = serde_json::to_string(records)?;
        self.store.set(key, &raw)
    }

    /// Current snapshot; empty if the collection was never written
    pub fn load(&self, kind: EntityKind, owner_id: &str) -> SyncResult<Vec<Record>> {
        let key = kind.collection_key(owner_id);
        let lock = self.lock_for(&key);
        let _guard = lock.lock();
        self.read(&key)
    }

    /// Load, mutate and persist the collection as one step.
    pub fn modify<F, R>(&self, kind: EntityKind, owner_id: &str, f: F) -> SyncResult<R>
    where
        F: FnOnce(&mut Vec<Record>) -> R,
    {
        let key = kind.collection_key(owner_id);
        let lock = self.lock_for(&key);
        let _guard = lock.lock();
        let mut records = self.read(&key)?;
        let result = f(&mut records);
        self.write(&key, &records)?;
        Ok(result)
    }

    /// Keys of every collection owned by `owner_id`
    pub fn keys_for_owner(owner_id: &str) -> Vec<String> {
        EntityKind::ALL
            .iter()
            .map(|kind| kind.collection_key(owner_id))
            .collect()
    }
}

/// Place a new record according to the kind's insertion policy.
pub fn insert_record(records: &mut Vec<Record>, kind: EntityKind, record: Record) {
    match kind.insertion() {
        Insertion::Append => records.push(record),
        Insertion::Prepend => records.insert(0, record),
    }
}

/// Place `batch`, already in collection order, as one block.
///
/// Appending kinds get it at the tail, prepending kinds at the head; either
/// way the block keeps its internal order.
pub fn insert_batch(records: &mut Vec<Record>, kind: EntityKind, batch: Vec<Record>) {
    match kind.insertion() {
        Insertion::Append => records.extend(batch),
        Insertion::Prepend => {
            records.splice(0..0, batch);
        }
    }
}

/// Build the refreshed collection from a server listing.
///
/// `fresh` already carries the queued writes. Cached records with a
/// temporary id that `fresh` lacks belong to creates still in flight and are
/// kept, in their cached order.
pub fn merge_refresh(cached: &[Record], mut fresh: Vec<Record>, kind: EntityKind) -> Vec<Record> {
    let in_flight: Vec<Record> = cached
        .iter()
        .filter(|r| r.id.is_temporary() && !fresh.iter().any(|f| f.id == r.id))
        .cloned()
        .collect();
    insert_batch(&mut fresh, kind, in_flight);
    fresh
}

/// Replace the record keyed by `temp_id` with the server's version.
///
/// Local edits made to the temporary record after `original` was sent are
/// carried over onto the server record. If the temporary record is gone and
/// `restore_missing` is set, the server record is inserted per the kind's
/// policy (unless already present). Returns whether the collection changed.
pub fn rekey_record(
    records: &mut Vec<Record>,
    kind: EntityKind,
    temp_id: &RecordId,
    original: &Record,
    server: &Record,
    restore_missing: bool,
) -> bool {
    let Some(pos) = records.iter().position(|r| &r.id == temp_id) else {
        if restore_missing && !records.iter().any(|r| r.id == server.id) {
            insert_record(records, kind, server.clone());
            return true;
        }
        return false;
    };
    let mut confirmed = server.clone();
    for (key, value) in &records[pos].fields {
        if original.fields.get(key) != Some(value) {
            confirmed.fields.insert(key.clone(), value.clone());
        }
    }
    let confirmed_id = confirmed.id.clone();
    records[pos] = confirmed;

    // Only one copy of the logical record may survive
    let mut index = 0;
    records.retain(|r| {
        let keep = r.id != confirmed_id || index == pos;
        index += 1;
        keep
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn record(owner: &str, title: &str) -> Record {
        Record::new_local(owner, json!({ "title": title }).as_object().cloned().unwrap())
    }

    fn cache() -> CollectionCache {
        CollectionCache::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_load_missing_collection_is_empty() {
        let cache = cache();
        assert!(cache.load(EntityKind::Task, "u").unwrap().is_empty());
    }

    #[test]
    fn test_collections_are_scoped_by_owner() {
        let cache = cache();
        cache
            .modify(EntityKind::Task, "alice", |c| c.push(record("alice", "A")))
            .unwrap();

        assert_eq!(cache.load(EntityKind::Task, "alice").unwrap().len(), 1);
        assert!(cache.load(EntityKind::Task, "bob").unwrap().is_empty());
        assert!(cache.load(EntityKind::AiNote, "alice").unwrap().is_empty());
    }

    #[test]
    fn test_insertion_policy() {
        let mut tasks = vec![record("u", "first")];
        insert_record(&mut tasks, EntityKind::Task, record("u", "second"));
        assert_eq!(tasks[1].field_str("title"), Some("second"));

        let mut notes = vec![record("u", "first")];
        insert_record(&mut notes, EntityKind::AiNote, record("u", "second"));
        assert_eq!(notes[0].field_str("title"), Some("second"));
    }

    #[test]
    fn test_rekey_replaces_in_place() {
        let local = record("u", "Essay");
        let other = record("u", "Reading");
        let mut records = vec![local.clone(), other.clone()];

        let mut server = local.clone();
        server.id = RecordId::new("srv-1");

        assert!(rekey_record(&mut records, EntityKind::Task, &local.id, &local, &server, true));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_str(), "srv-1");
        assert_eq!(records[1].id, other.id);
    }

    #[test]
    fn test_rekey_keeps_later_local_edits() {
        let local = record("u", "Essay");
        let mut edited = local.clone();
        edited.apply_changes(&json!({"completed": true}).as_object().cloned().unwrap());
        let mut records = vec![edited];

        let mut server = local.clone();
        server.id = RecordId::new("srv-1");

        rekey_record(&mut records, EntityKind::Task, &local.id, &local, &server, true);
        assert_eq!(records[0].fields["completed"], json!(true));
    }

    #[test]
    fn test_rekey_never_duplicates() {
        let local = record("u", "Essay");
        let mut server = local.clone();
        server.id = RecordId::new("srv-1");
        // A refresh already brought the server copy in
        let mut records = vec![server.clone(), local.clone()];

        rekey_record(&mut records, EntityKind::Task, &local.id, &local, &server, true);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_str(), "srv-1");
    }

    #[test]
    fn test_rekey_missing_record() {
        let local = record("u", "Essay");
        let other = record("u", "Reading");
        let mut server = local.clone();
        server.id = RecordId::new("srv-1");

        // Deleted locally meanwhile: stays gone
        let mut records = vec![other.clone()];
        assert!(!rekey_record(&mut records, EntityKind::Task, &local.id, &local, &server, false));
        assert_eq!(records, vec![other.clone()]);

        // Dropped by a concurrent refresh: the confirmed record comes back
        assert!(rekey_record(&mut records, EntityKind::Task, &local.id, &local, &server, true));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id.as_str(), "srv-1");

        assert!(!rekey_record(&mut records, EntityKind::Task, &local.id, &local, &server, true));
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_insert_batch_keeps_block_order() {
        let titles = |records: &[Record]| -> Vec<String> {
            records
                .iter()
                .map(|r| r.field_str("title").unwrap_or_default().to_string())
                .collect()
        };
        let batch = vec![record("u", "A"), record("u", "B"), record("u", "C")];

        let mut tasks = vec![record("u", "old")];
        insert_batch(&mut tasks, EntityKind::Task, batch.clone());
        assert_eq!(titles(&tasks), ["old", "A", "B", "C"]);

        let mut moods = vec![record("u", "old")];
        insert_batch(&mut moods, EntityKind::MoodEntry, batch);
        assert_eq!(titles(&moods), ["A", "B", "C", "old"]);
    }

    #[test]
    fn test_merge_refresh_keeps_in_flight_creates() {
        let mut server = record("u", "Server");
        server.id = RecordId::new("1");
        let in_flight = record("u", "Sending");
        let mut stale = record("u", "Gone remotely");
        stale.id = RecordId::new("2");
        let cached = vec![stale, in_flight.clone()];

        let merged = merge_refresh(&cached, vec![server.clone()], EntityKind::Task);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, server.id);
        assert_eq!(merged[1].id, in_flight.id);
    }
}
