//! OfflineEngine - the primary entry point for StudySync
//!
//! OfflineEngine coordinates the Local Store, the Remote Data Gateway and the
//! Reachability Monitor so that:
//! - Reads always answer, from the server when possible and the cache otherwise
//! - Writes are applied locally first and replicated when the network allows
//! - Everything accepted offline is replayed in order once back online
//!
//! # Example
//!
//! ```ignore
//! use studysync_core::{OfflineEngine, NewTask};
//!
//! let engine = OfflineEngine::new(store, gateway, reachability);
//! let _listener = engine.spawn_connectivity_listener();
//!
//! let task = engine.add_task("user-1", NewTask::new("Essay")).await?;
//! let tasks = engine.get_tasks("user-1").await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{self, CollectionCache};
use crate::config::{EngineConfig, DEFAULT_EVENT_CHANNEL_CAPACITY};
use crate::error::SyncResult;
use crate::events::EngineEvent;
use crate::gateway::RemoteGateway;
use crate::network::Reachability;
use crate::queue::{overlay_pending, SyncOp, SyncQueue, SyncQueueEntry};
use crate::storage::{keys, LocalStore, RedbStore};
use crate::types::{EntityKind, Fields, Record, RecordId, GUEST_USER_ID};

mod guest;
mod reconcile;
mod typed;

/// Process-wide connectivity flags
#[derive(Debug, Default)]
pub struct ConnectivityState {
    online: AtomicBool,
    sync_in_progress: AtomicBool,
}

impl ConnectivityState {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            sync_in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.sync_in_progress.load(Ordering::SeqCst)
    }

    /// Set the online flag, returning the previous value
    fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst)
    }

    /// Claim the sync slot; `None` if a pass is already running.
    fn try_begin_sync(&self) -> Option<SyncGuard<'_>> {
        self.sync_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SyncGuard {
                flag: &self.sync_in_progress,
            })
    }
}

/// Clears `sync_in_progress` when dropped, on every exit path.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

struct EngineInner {
    store: Arc<dyn LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    reachability: Arc<dyn Reachability>,
    cache: CollectionCache,
    queue: SyncQueue,
    state: ConnectivityState,
    sync_on_start: bool,
    event_tx: broadcast::Sender<EngineEvent>,
}

/// Offline cache & sync engine
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct OfflineEngine {
    inner: Arc<EngineInner>,
}

impl OfflineEngine {
    /// Create an engine over the given collaborators with default settings.
    ///
    /// The initial online flag is taken from `reachability.check()`.
    pub fn new(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        Self::build(
            store,
            gateway,
            reachability,
            DEFAULT_EVENT_CHANNEL_CAPACITY,
            true,
        )
    }

    /// Create an engine with settings from `config`
    pub fn with_config(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        reachability: Arc<dyn Reachability>,
        config: &EngineConfig,
    ) -> Self {
        Self::build(
            store,
            gateway,
            reachability,
            config.event_channel_capacity.max(1),
            config.sync_on_start,
        )
    }

    /// Open the redb-backed store under `config.data_dir` and build an engine on it.
    pub fn open(
        config: &EngineConfig,
        gateway: Arc<dyn RemoteGateway>,
        reachability: Arc<dyn Reachability>,
    ) -> SyncResult<Self> {
        let store = RedbStore::new(config.database_path())?;
        info!(path = %config.database_path().display(), "Opened local store");
        Ok(Self::with_config(
            Arc::new(store),
            gateway,
            reachability,
            config,
        ))
    }

    fn build(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        reachability: Arc<dyn Reachability>,
        event_channel_capacity: usize,
        sync_on_start: bool,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(event_channel_capacity);
        let online = reachability.check();
        Self {
            inner: Arc::new(EngineInner {
                cache: CollectionCache::new(store.clone()),
                queue: SyncQueue::new(store.clone()),
                store,
                gateway,
                reachability,
                state: ConnectivityState::new(online),
                sync_on_start,
                event_tx,
            }),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Connectivity
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_online(&self) -> bool {
        self.inner.state.is_online()
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.inner.state.is_sync_in_progress()
    }

    /// Point-in-time check against the Reachability Monitor
    pub fn is_network_available(&self) -> bool {
        self.inner.reachability.check()
    }

    /// React to a reachability transition.
    ///
    /// Going from offline to online starts a background sync pass; this call
    /// never waits for it. Must be called from within a Tokio runtime.
    pub fn handle_connectivity_change(&self, connected: bool) -> Option<JoinHandle<()>> {
        let was_online = self.inner.state.set_online(connected);
        if was_online == connected {
            return None;
        }
        info!(online = connected, "Connectivity changed");
        self.emit(EngineEvent::ConnectivityChanged { online: connected });

        if !was_online && connected {
            Some(self.spawn_sync())
        } else {
            None
        }
    }

    /// Start the background task that follows Reachability transitions.
    ///
    /// If the engine is online when the listener starts and `sync_on_start` is
    /// set, a first pass runs immediately. The task ends when the monitor's
    /// channel closes; abort the handle to stop it earlier.
    pub fn spawn_connectivity_listener(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let mut transitions = self.inner.reachability.subscribe();

        tokio::spawn(async move {
            // Pick up anything that changed before we subscribed
            let current = engine.inner.reachability.check();
            if engine.handle_connectivity_change(current).is_none()
                && current
                && engine.inner.sync_on_start
            {
                engine.spawn_sync();
            }

            loop {
                match transitions.recv().await {
                    Ok(connected) => {
                        engine.handle_connectivity_change(connected);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Connectivity listener lagged, re-checking");
                        let connected = engine.inner.reachability.check();
                        engine.handle_connectivity_change(connected);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Reachability channel closed, stopping listener");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_sync(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            match engine.sync_with_server().await {
                Ok(outcome) => debug!(?outcome, "Background sync finished"),
                Err(e) => error!(error = %e, "Background sync failed on local store"),
            }
        })
    }

    /// Remote calls are made only when online and not a guest.
    fn should_use_remote(&self) -> SyncResult<bool> {
        Ok(self.is_online() && !self.is_guest_mode()?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Read Path
    // ═══════════════════════════════════════════════════════════════════════

    /// List the records of `kind` owned by `owner_id`.
    ///
    /// Served from the gateway when online (the cache is refreshed with the
    /// result) and from the cache otherwise or on any remote failure.
    /// Writes still waiting in the sync queue are layered over a fresh
    /// listing. Only a Local Store fault makes this fail.
    pub async fn list(&self, kind: EntityKind, owner_id: &str) -> SyncResult<Vec<Record>> {
        if self.should_use_remote()? {
            match self.inner.gateway.list(kind, owner_id).await {
                Ok(fresh) => {
                    let records = self
                        .inner
                        .cache
                        .modify(kind, owner_id, |cached| -> SyncResult<Vec<Record>> {
                            let mut fresh = fresh;
                            let pending = self.inner.queue.load()?;
                            overlay_pending(&mut fresh, kind, owner_id, &pending);
                            *cached = cache::merge_refresh(cached, fresh, kind);
                            Ok(cached.clone())
                        })
                        .and_then(|refreshed| refreshed)
                        .inspect_err(|e| error!(%kind, error = %e, "Failed to refresh cache"))?;
                    debug!(%kind, owner_id, count = records.len(), "Listed from gateway");
                    return Ok(records);
                }
                Err(e) => {
                    warn!(%kind, owner_id, error = %e, "Gateway list failed, serving cache");
                }
            }
        }

        let records = self
            .inner
            .cache
            .load(kind, owner_id)
            .inspect_err(|e| error!(%kind, error = %e, "Failed to read cache"))?;
        debug!(%kind, owner_id, count = records.len(), "Listed from cache");
        Ok(records)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Write Path
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a record from `fields`.
    ///
    /// Returns the server record when the gateway confirmed it, otherwise the
    /// local record with its temporary id.
    pub async fn create(&self, kind: EntityKind, owner_id: &str, fields: Fields) -> SyncResult<Record> {
        let record = Record::new_local(owner_id, fields);
        self.inner
            .cache
            .modify(kind, owner_id, |records| {
                cache::insert_record(records, kind, record.clone())
            })
            .inspect_err(|e| error!(%kind, error = %e, "Failed to write cache"))?;
        debug!(%kind, id = %record.id, "Created locally");

        if !self.should_use_remote()? {
            self.inner
                .queue
                .enqueue(kind, owner_id, SyncOp::Create { record: record.clone() })?;
            return Ok(record);
        }

        match self.inner.gateway.create(kind, &record, owner_id).await {
            Ok(confirmed) => {
                self.confirm_create(kind, owner_id, &record, &confirmed)?;
                info!(%kind, temp_id = %record.id, id = %confirmed.id, "Create confirmed");
                Ok(confirmed)
            }
            Err(e) => {
                warn!(%kind, id = %record.id, error = %e, "Gateway create failed, queued");
                self.inner
                    .queue
                    .enqueue(kind, owner_id, SyncOp::Create { record: record.clone() })?;
                Ok(record)
            }
        }
    }

    /// Re-key a confirmed create in the cache and in any queued writes.
    fn confirm_create(
        &self,
        kind: EntityKind,
        owner_id: &str,
        original: &Record,
        confirmed: &Record,
    ) -> SyncResult<()> {
        let remaps = [(original.id.clone(), confirmed.id.clone())].into_iter().collect();
        self.inner.queue.settle(&Default::default(), &remaps)?;
        self.rekey_cached(kind, owner_id, original, confirmed)?;
        Ok(())
    }

    /// Swap a cached temporary record for its confirmed version.
    ///
    /// A record missing from the cache is restored unless a delete for it is
    /// still queued.
    fn rekey_cached(
        &self,
        kind: EntityKind,
        owner_id: &str,
        original: &Record,
        confirmed: &Record,
    ) -> SyncResult<()> {
        self.inner
            .cache
            .modify(kind, owner_id, |records| -> SyncResult<()> {
                let deleted = self
                    .inner
                    .queue
                    .has_pending_delete(&[&original.id, &confirmed.id])?;
                cache::rekey_record(records, kind, &original.id, original, confirmed, !deleted);
                Ok(())
            })
            .and_then(|rekeyed| rekeyed)
    }

    /// Merge `changes` into the record `id`.
    ///
    /// Returns the locally updated record, or `None` if it is not cached.
    /// The change is replicated (or queued) either way.
    pub async fn update(
        &self,
        kind: EntityKind,
        owner_id: &str,
        id: &RecordId,
        changes: Fields,
    ) -> SyncResult<Option<Record>> {
        let requested = id;
        let id = &self.inner.queue.resolve(requested)?;
        let updated = self
            .inner
            .cache
            .modify(kind, owner_id, |records| {
                records.iter_mut().find(|r| &r.id == id || &r.id == requested).map(|record| {
                    record.apply_changes(&changes);
                    record.clone()
                })
            })
            .inspect_err(|e| error!(%kind, error = %e, "Failed to write cache"))?;
        if updated.is_none() {
            debug!(%kind, %id, "Update target not in cache");
        }

        // A temporary id is unknown to the server until its create replays
        if id.is_temporary() || !self.should_use_remote()? {
            self.inner.queue.enqueue(
                kind,
                owner_id,
                SyncOp::Update {
                    id: id.clone(),
                    changes,
                },
            )?;
            return Ok(updated);
        }

        if let Err(e) = self.inner.gateway.update(kind, id, &changes, owner_id).await {
            warn!(%kind, %id, error = %e, "Gateway update failed, queued");
            self.inner.queue.enqueue(
                kind,
                owner_id,
                SyncOp::Update {
                    id: id.clone(),
                    changes,
                },
            )?;
        }
        Ok(updated)
    }

    /// Remove the record `id`.
    pub async fn delete(&self, kind: EntityKind, owner_id: &str, id: &RecordId) -> SyncResult<()> {
        let requested = id;
        let id = &self.inner.queue.resolve(requested)?;
        self.inner
            .cache
            .modify(kind, owner_id, |records| {
                records.retain(|r| &r.id != id && &r.id != requested)
            })
            .inspect_err(|e| error!(%kind, error = %e, "Failed to write cache"))?;

        if id.is_temporary() || !self.should_use_remote()? {
            self.inner
                .queue
                .enqueue(kind, owner_id, SyncOp::Delete { id: id.clone() })?;
            return Ok(());
        }

        if let Err(e) = self.inner.gateway.delete(kind, id, owner_id).await {
            warn!(%kind, %id, error = %e, "Gateway delete failed, queued");
            self.inner
                .queue
                .enqueue(kind, owner_id, SyncOp::Delete { id: id.clone() })?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Housekeeping
    // ═══════════════════════════════════════════════════════════════════════

    /// Pending writes in replay order
    pub fn pending_queue(&self) -> SyncResult<Vec<SyncQueueEntry>> {
        self.inner.queue.load()
    }

    /// Remove cached data for `owner_id` and the guest, plus the queue, the
    /// guest flag and the guest profile.
    pub fn clear_offline_data(&self, owner_id: &str) -> SyncResult<()> {
        let mut doomed = CollectionCache::keys_for_owner(owner_id);
        if owner_id != GUEST_USER_ID {
            doomed.extend(CollectionCache::keys_for_owner(GUEST_USER_ID));
        }
        doomed.extend(
            [keys::SYNC_QUEUE, keys::ID_REMAPS, keys::GUEST_MODE, keys::USER_PROFILE]
                .iter()
                .map(|k| k.to_string()),
        );
        self.inner.store.remove_all(&doomed)?;
        info!(owner_id, "Cleared offline data");
        Ok(())
    }

    /// Wipe the whole Local Store
    pub fn logout(&self) -> SyncResult<()> {
        self.inner.store.clear()?;
        info!("Logged out, local store cleared");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════════════════════════════════

    /// Subscribe to engine events
    ///
    /// ```ignore
    /// let mut events = engine.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         if let EngineEvent::SyncFinished(outcome) = event {
    ///             println!("sync: {:?}", outcome);
    ///         }
    ///     }
    /// });
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        debug!(event = event.name(), "Engine event");
        let _ = self.inner.event_tx.send(event);
    }
}
