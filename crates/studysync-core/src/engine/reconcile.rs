//! Queue replay (`sync_with_server`).

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info, warn};

use super::OfflineEngine;
use crate::error::{GatewayResult, SyncResult};
use crate::events::{EngineEvent, SkipReason, SyncOutcome, SyncReport};
use crate::queue::SyncOp;
use crate::types::{EntityKind, Record, RecordId};

impl OfflineEngine {
    /// Replay the sync queue against the gateway.
    ///
    /// Entries are sent one at a time in enqueue order. A failing entry stays
    /// queued and the pass moves on. Updates and deletes aimed at a record
    /// whose create has not been confirmed yet are held back. The
    /// in-progress flag is cleared on every exit path.
    ///
    /// Errors only on a Local Store fault.
    pub async fn sync_with_server(&self) -> SyncResult<SyncOutcome> {
        let outcome = self.run_sync_pass().await;
        match &outcome {
            Ok(outcome) => self.emit(EngineEvent::SyncFinished(outcome.clone())),
            Err(e) => error!(error = %e, "Sync pass failed on local store"),
        }
        outcome
    }

    async fn run_sync_pass(&self) -> SyncResult<SyncOutcome> {
        if self.is_sync_in_progress() {
            debug!("Sync skipped: already in progress");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyRunning));
        }
        if !self.is_online() {
            debug!("Sync skipped: offline");
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        if self.is_guest_mode()? {
            debug!("Sync skipped: guest mode");
            return Ok(SyncOutcome::Skipped(SkipReason::GuestMode));
        }
        let Some(_guard) = self.inner.state.try_begin_sync() else {
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        let snapshot = self.inner.queue.load()?;
        if snapshot.is_empty() {
            debug!("Sync skipped: queue empty");
            return Ok(SyncOutcome::Skipped(SkipReason::EmptyQueue));
        }

        let user_id = match self.inner.gateway.current_user_id().await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(pending = snapshot.len(), "Sync aborted: no session");
                return Ok(SyncOutcome::Aborted("no authenticated session".into()));
            }
            Err(e) => {
                warn!(error = %e, "Sync aborted: session lookup failed");
                return Ok(SyncOutcome::Aborted(format!("session lookup failed: {}", e)));
            }
        };

        info!(pending = snapshot.len(), "Sync started");
        self.emit(EngineEvent::SyncStarted {
            pending: snapshot.len(),
        });

        let mut report = SyncReport {
            snapshot_len: snapshot.len(),
            ..Default::default()
        };
        let mut processed = HashSet::new();
        let mut remaps: HashMap<RecordId, RecordId> = HashMap::new();

        for entry in &snapshot {
            let mut op = entry.op.clone();
            op.remap(&remaps);

            if op.awaits_create() {
                debug!(queue_id = %entry.id, target = %op.target(), "Deferred until create confirms");
                report.deferred += 1;
                continue;
            }

            match self.replay(entry.kind, &op, &user_id).await {
                Ok(confirmed) => {
                    if let (SyncOp::Create { record }, Some(confirmed)) = (&op, confirmed) {
                        remaps.insert(record.id.clone(), confirmed.id.clone());
                        self.rekey_after_replay(entry.kind, &entry.owner_id, record, &confirmed);
                    }
                    debug!(queue_id = %entry.id, kind = %entry.kind, action = op.name(), "Replayed");
                    processed.insert(entry.id.clone());
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(
                        queue_id = %entry.id,
                        kind = %entry.kind,
                        action = op.name(),
                        target = %op.target(),
                        transient = e.is_transient(),
                        error = %e,
                        "Replay failed, kept for next pass"
                    );
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.inner.queue.settle(&processed, &remaps)?;
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            deferred = report.deferred,
            remaining = report.remaining,
            "Sync completed"
        );
        Ok(SyncOutcome::Completed(report))
    }

    async fn replay(
        &self,
        kind: EntityKind,
        op: &SyncOp,
        user_id: &str,
    ) -> GatewayResult<Option<Record>> {
        let gateway = &self.inner.gateway;
        match op {
            SyncOp::Create { record } => gateway.create(kind, record, user_id).await.map(Some),
            SyncOp::Update { id, changes } => gateway
                .update(kind, id, changes, user_id)
                .await
                .map(|_| None),
            SyncOp::Delete { id } => gateway.delete(kind, id, user_id).await.map(|_| None),
        }
    }

    /// Logs instead of failing: the entry is already confirmed remotely.
    fn rekey_after_replay(&self, kind: EntityKind, owner_id: &str, original: &Record, confirmed: &Record) {
        if let Err(e) = self.rekey_cached(kind, owner_id, original, confirmed) {
            error!(%kind, temp_id = %original.id, error = %e, "Failed to re-key cached record");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::network::ManualReachability;
    use crate::storage::MemoryStore;
    use crate::testing::MemoryGateway;
    use crate::types::Fields;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn offline_engine(gateway: Arc<MemoryGateway>) -> OfflineEngine {
        OfflineEngine::new(
            Arc::new(MemoryStore::new()),
            gateway,
            Arc::new(ManualReachability::new(false)),
        )
    }

    #[tokio::test]
    async fn test_sync_skips_when_offline() {
        let gateway = Arc::new(MemoryGateway::with_session("u1"));
        let engine = offline_engine(gateway.clone());

        let outcome = engine.sync_with_server().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::Offline));
        assert_eq!(gateway.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_sync_aborts_without_session() {
        let gateway = Arc::new(MemoryGateway::new());
        let engine = offline_engine(gateway.clone());
        engine
            .create(EntityKind::Task, "u1", fields(json!({"title": "Essay"})))
            .await
            .unwrap();

        engine.inner.state.set_online(true);
        let outcome = engine.sync_with_server().await.unwrap();

        assert!(matches!(outcome, SyncOutcome::Aborted(_)));
        assert_eq!(engine.pending_queue().unwrap().len(), 1);
        assert!(!engine.is_sync_in_progress());
        assert_eq!(gateway.calls().create, 0);
    }

    #[tokio::test]
    async fn test_sync_skips_while_another_pass_runs() {
        let gateway = Arc::new(MemoryGateway::with_session("u1"));
        let engine = offline_engine(gateway);
        engine.inner.state.set_online(true);

        let _held = engine.inner.state.try_begin_sync().unwrap();
        let outcome = engine.sync_with_server().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_sync_replays_followups_against_confirmed_id() {
        let gateway = Arc::new(MemoryGateway::with_session("u1"));
        let engine = offline_engine(gateway.clone());

        let local = engine
            .create(EntityKind::Task, "u1", fields(json!({"title": "Essay"})))
            .await
            .unwrap();
        engine
            .update(
                EntityKind::Task,
                "u1",
                &local.id,
                fields(json!({"completed": true})),
            )
            .await
            .unwrap();

        engine.inner.state.set_online(true);
        let outcome = engine.sync_with_server().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.remaining, 0);

        let server = gateway.records(EntityKind::Task, "u1");
        assert_eq!(server.len(), 1);
        assert_eq!(server[0].fields["completed"], json!(true));

        let cached = engine.inner.cache.load(EntityKind::Task, "u1").unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, server[0].id);
    }

    #[tokio::test]
    async fn test_followup_deferred_when_create_fails() {
        let gateway = Arc::new(MemoryGateway::with_session("u1"));
        let engine = offline_engine(gateway.clone());

        let local = engine
            .create(EntityKind::Task, "u1", fields(json!({"title": "Essay"})))
            .await
            .unwrap();
        engine
            .delete(EntityKind::Task, "u1", &local.id)
            .await
            .unwrap();

        engine.inner.state.set_online(true);
        gateway.fail_next(1);
        let report = engine
            .sync_with_server()
            .await
            .unwrap()
            .report()
            .cloned()
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(gateway.calls().delete, 0);

        // Next pass sends both, in order
        let report = engine
            .sync_with_server()
            .await
            .unwrap()
            .report()
            .cloned()
            .unwrap();
        assert_eq!(report.succeeded, 2);
        assert!(gateway.records(EntityKind::Task, "u1").is_empty());
    }
}
