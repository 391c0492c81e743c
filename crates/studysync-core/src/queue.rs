//! Persistent FIFO of deferred remote writes.
//!
//! The whole queue is one JSON array under [`keys::SYNC_QUEUE`]. Entries are
//! appended at the tail and only ever removed by id, so order is insertion
//! order. Every load-modify-store runs under a single queue lock.
//!
//! Confirmed temporary ids are remembered under [`keys::ID_REMAPS`], so a
//! write aimed at a temporary id after its create went through is queued
//! against the server id instead.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncResult;
use crate::storage::{keys, LocalStore};
use crate::types::{next_ulid, EntityKind, Fields, Record, RecordId};

/// Prefix of queue entry ids
pub const QUEUE_ID_PREFIX: &str = "sync_";

/// One deferred remote write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncOp {
    Create { record: Record },
    Update { id: RecordId, changes: Fields },
    Delete { id: RecordId },
}

impl SyncOp {
    pub fn name(&self) -> &'static str {
        match self {
            SyncOp::Create { .. } => "create",
            SyncOp::Update { .. } => "update",
            SyncOp::Delete { .. } => "delete",
        }
    }

    /// Id of the record this operation is about
    pub fn target(&self) -> &RecordId {
        match self {
            SyncOp::Create { record } => &record.id,
            SyncOp::Update { id, .. } | SyncOp::Delete { id } => id,
        }
    }

    /// An update or delete that cannot be sent until its create is confirmed.
    pub fn awaits_create(&self) -> bool {
        !matches!(self, SyncOp::Create { .. }) && self.target().is_temporary()
    }

    /// Rewrite a temporary target id that has since been confirmed.
    ///
    /// Creates are never rewritten; the server assigns their id.
    pub fn remap(&mut self, remaps: &HashMap<RecordId, RecordId>) -> bool {
        match self {
            SyncOp::Create { .. } => false,
            SyncOp::Update { id, .. } | SyncOp::Delete { id } => match remaps.get(id) {
                Some(confirmed) => {
                    *id = confirmed.clone();
                    true
                }
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Owner of the cached collection the write was made in
    pub owner_id: String,
    pub op: SyncOp,
    #[serde(rename = "timestamp")]
    pub enqueued_at: DateTime<Utc>,
}

impl SyncQueueEntry {
    pub fn new(kind: EntityKind, owner_id: impl Into<String>, op: SyncOp) -> Self {
        Self {
            id: format!("{}{}", QUEUE_ID_PREFIX, next_ulid()),
            kind,
            owner_id: owner_id.into(),
            op,
            enqueued_at: Utc::now(),
        }
    }
}

pub struct SyncQueue {
    store: Arc<dyn LocalStore>,
    lock: Mutex<()>,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> SyncResult<Vec<SyncQueueEntry>> {
        match self.store.get(keys::SYNC_QUEUE)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, entries: &[SyncQueueEntry]) -> SyncResult<()> {
        let raw = serde_json::to_string(entries)?;
        self.store.set(keys::SYNC_QUEUE, &raw)
    }

    fn read_remaps(&self) -> SyncResult<BTreeMap<String, String>> {
        match self.store.get(keys::ID_REMAPS)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeMap::new()),
        }
    }

    fn lookup(remaps: &BTreeMap<String, String>, id: &RecordId) -> Option<RecordId> {
        if !id.is_temporary() {
            return None;
        }
        remaps.get(id.as_str()).map(|confirmed| RecordId::new(confirmed.clone()))
    }

    /// The server id of a confirmed temporary id, otherwise `id` itself.
    pub fn resolve(&self, id: &RecordId) -> SyncResult<RecordId> {
        if !id.is_temporary() {
            return Ok(id.clone());
        }
        let _guard = self.lock.lock();
        let remaps = self.read_remaps()?;
        Ok(Self::lookup(&remaps, id).unwrap_or_else(|| id.clone()))
    }

    /// Snapshot of the queue in enqueue order
    pub fn load(&self) -> SyncResult<Vec<SyncQueueEntry>> {
        let _guard = self.lock.lock();
        self.read()
    }

    pub fn len(&self) -> SyncResult<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Append an entry at the tail.
    ///
    /// An update or delete whose temporary target is already confirmed is
    /// stored against the server id.
    pub fn enqueue(&self, kind: EntityKind, owner_id: &str, mut op: SyncOp) -> SyncResult<SyncQueueEntry> {
        let _guard = self.lock.lock();
        if op.awaits_create() {
            let remaps = self.read_remaps()?;
            if let Some(confirmed) = Self::lookup(&remaps, op.target()) {
                let temp = op.target().clone();
                op.remap(&HashMap::from([(temp, confirmed)]));
            }
        }
        let entry = SyncQueueEntry::new(kind, owner_id, op);
        let mut entries = self.read()?;
        entries.push(entry.clone());
        self.write(&entries)?;
        debug!(
            queue_id = %entry.id,
            kind = %kind,
            action = entry.op.name(),
            target = %entry.op.target(),
            depth = entries.len(),
            "Enqueued remote write"
        );
        Ok(entry)
    }

    /// Drop processed entries and remap confirmed ids in the rest.
    ///
    /// Works on the queue as persisted now, not on the caller's snapshot, so
    /// entries appended meanwhile survive. `remaps` are also remembered for
    /// later enqueues. Returns the resulting length.
    pub fn settle(
        &self,
        processed: &HashSet<String>,
        remaps: &HashMap<RecordId, RecordId>,
    ) -> SyncResult<usize> {
        let _guard = self.lock.lock();
        let mut entries = self.read()?;
        entries.retain(|entry| !processed.contains(&entry.id));
        if !remaps.is_empty() {
            let mut known = self.read_remaps()?;
            known.extend(
                remaps
                    .iter()
                    .map(|(temp, confirmed)| (temp.to_string(), confirmed.to_string())),
            );
            self.store.set(keys::ID_REMAPS, &serde_json::to_string(&known)?)?;
            for entry in entries.iter_mut() {
                entry.op.remap(remaps);
            }
        }
        self.write(&entries)?;
        Ok(entries.len())
    }

    /// Whether a delete for any of `ids` is still queued
    pub fn has_pending_delete(&self, ids: &[&RecordId]) -> SyncResult<bool> {
        Ok(self
            .load()?
            .iter()
            .any(|entry| matches!(&entry.op, SyncOp::Delete { id } if ids.contains(&id))))
    }

    /// Drop the queue and the remembered id remaps
    pub fn clear(&self) -> SyncResult<()> {
        let _guard = self.lock.lock();
        self.store
            .remove_all(&[keys::SYNC_QUEUE.to_string(), keys::ID_REMAPS.to_string()])
    }
}

/// Replay pending local writes for one collection over a server listing.
///
/// A fresh listing does not yet contain writes still sitting in the queue;
/// layering them back keeps reads consistent with what the user wrote.
pub fn overlay_pending(records: &mut Vec<Record>, kind: EntityKind, owner_id: &str, pending: &[SyncQueueEntry]) {
    for entry in pending
        .iter()
        .filter(|e| e.kind == kind && e.owner_id == owner_id)
    {
        match &entry.op {
            SyncOp::Create { record } => {
                if !records.iter().any(|r| r.id == record.id) {
                    crate::cache::insert_record(records, kind, record.clone());
                }
            }
            SyncOp::Update { id, changes } => {
                if let Some(record) = records.iter_mut().find(|r| &r.id == id) {
                    record.apply_changes(changes);
                }
            }
            SyncOp::Delete { id } => records.retain(|r| &r.id != id),
        }
    }
}
