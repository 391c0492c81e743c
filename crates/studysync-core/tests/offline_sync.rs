//! Offline write / reconnect / replay integration tests
//!
//! Drives `OfflineEngine` against the in-process `MemoryGateway` with a
//! `ManualReachability` standing in for the OS network callback.
//!
//! ## What These Tests Verify
//!
//! - Offline creates are readable immediately and replayed on reconnect
//! - Temporary ids are replaced by server ids after confirmation
//! - A failing queue entry does not block the ones behind it
//! - Passes never overlap and never lose entries queued mid-pass
//! - Queue and cache survive a restart on the redb store

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use studysync_core::testing::MemoryGateway;
use studysync_core::{
    EngineEvent, EntityKind, Fields, LocalStore, ManualReachability, MemoryStore, NewMoodEntry,
    NewTask, OfflineEngine, RedbStore, SkipReason, SyncOutcome,
};
use tempfile::tempdir;
use tokio::time::timeout;

const OWNER: &str = "student-1";

fn fields(value: serde_json::Value) -> Fields {
    value.as_object().cloned().unwrap()
}

fn engine_on(
    store: Arc<dyn LocalStore>,
    gateway: Arc<MemoryGateway>,
    reach: Arc<ManualReachability>,
) -> OfflineEngine {
    OfflineEngine::new(store, gateway, reach)
}

fn offline_setup() -> (OfflineEngine, Arc<MemoryGateway>, Arc<ManualReachability>) {
    let gateway = Arc::new(MemoryGateway::with_session(OWNER));
    let reach = Arc::new(ManualReachability::new(false));
    let engine = engine_on(Arc::new(MemoryStore::new()), gateway.clone(), reach.clone());
    (engine, gateway, reach)
}

/// Flip the engine online and wait for the sync pass it starts
async fn reconnect(engine: &OfflineEngine) {
    let handle = engine
        .handle_connectivity_change(true)
        .expect("offline -> online starts a sync pass");
    handle.await.unwrap();
}

#[tokio::test]
async fn test_offline_essay_is_replayed_on_reconnect() {
    let (engine, gateway, _) = offline_setup();

    let local = engine.add_task(OWNER, NewTask::new("Essay")).await.unwrap();
    assert!(local.id.is_temporary());

    let tasks = engine.get_tasks(OWNER).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, local.id);
    assert_eq!(engine.pending_queue().unwrap().len(), 1);

    reconnect(&engine).await;

    let remote = gateway.records(EntityKind::Task, OWNER);
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].field_str("title"), Some("Essay"));
    assert!(engine.pending_queue().unwrap().is_empty());

    let tasks = engine.get_tasks(OWNER).await.unwrap();
    assert_eq!(tasks.len(), 1, "no duplicate after re-keying");
    assert_eq!(tasks[0].id, remote[0].id);
    assert!(!tasks[0].id.is_temporary());
}

#[tokio::test]
async fn test_listener_syncs_on_transition() {
    let (engine, gateway, reach) = offline_setup();
    engine
        .add_mood_entry(OWNER, NewMoodEntry::new(4))
        .await
        .unwrap();

    let mut events = engine.subscribe();
    let listener = engine.spawn_connectivity_listener();
    reach.set_connected(true);

    let outcome = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                EngineEvent::SyncFinished(outcome) => break outcome,
                _ => continue,
            }
        }
    })
    .await
    .expect("sync pass after reconnect");

    assert_eq!(outcome.report().unwrap().succeeded, 1);
    assert_eq!(gateway.records(EntityKind::MoodEntry, OWNER).len(), 1);
    assert!(engine.is_online());
    listener.abort();
}

#[tokio::test]
async fn test_failing_entry_does_not_block_the_rest() {
    let (engine, gateway, _) = offline_setup();

    let first = engine.add_task(OWNER, NewTask::new("one")).await.unwrap();
    let second = engine.add_task(OWNER, NewTask::new("two")).await.unwrap();
    let third = engine.add_task(OWNER, NewTask::new("three")).await.unwrap();
    gateway.fail_on(second.id.clone());

    reconnect(&engine).await;

    let queue = engine.pending_queue().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].op.target(), &second.id);

    let titles: Vec<_> = gateway
        .records(EntityKind::Task, OWNER)
        .iter()
        .map(|r| r.field_str("title").unwrap_or_default().to_string())
        .collect();
    assert_eq!(titles, vec!["one", "three"]);

    let cached = engine.get_tasks(OWNER).await.unwrap();
    assert_eq!(cached.len(), 3);
    assert!(cached.iter().any(|r| r.id == second.id));
    assert!(!cached.iter().any(|r| r.id == first.id || r.id == third.id));

    // The survivor goes through once the fault clears
    gateway.clear_failures();
    let outcome = engine.sync_with_server().await.unwrap();
    assert_eq!(outcome.report().unwrap().succeeded, 1);
    assert!(engine.pending_queue().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_sync_is_idempotent() {
    let gateway = Arc::new(MemoryGateway::with_session(OWNER));
    let engine = engine_on(
        Arc::new(MemoryStore::new()),
        gateway.clone(),
        Arc::new(ManualReachability::new(true)),
    );

    let first = engine.sync_with_server().await.unwrap();
    let second = engine.sync_with_server().await.unwrap();

    assert_eq!(first, SyncOutcome::Skipped(SkipReason::EmptyQueue));
    assert_eq!(second, SyncOutcome::Skipped(SkipReason::EmptyQueue));
    assert_eq!(gateway.calls().total(), 0);
}

#[tokio::test]
async fn test_read_falls_back_to_cache_on_gateway_failure() {
    let (engine, gateway, _) = offline_setup();
    engine
        .add_journal_entry(OWNER, studysync_core::NewJournalEntry::new("Notes"))
        .await
        .unwrap();
    reconnect(&engine).await;

    gateway.set_offline(true);
    let entries = engine.get_journal_entries(OWNER).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].field_str("content"), Some("Notes"));
}

#[tokio::test]
async fn test_passes_do_not_overlap() {
    let (engine, gateway, _) = offline_setup();
    engine.add_task(OWNER, NewTask::new("slow")).await.unwrap();
    gateway.set_latency(Some(Duration::from_millis(150)));
    engine.handle_connectivity_change(true);

    // The pass started by the transition holds the flag
    tokio::time::sleep(Duration::from_millis(30)).await;
    let outcome = engine.sync_with_server().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::AlreadyRunning));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!engine.is_sync_in_progress());
    assert_eq!(gateway.calls().create, 1);
}

#[tokio::test]
async fn test_write_queued_mid_pass_survives_and_is_remapped() {
    let (engine, gateway, _) = offline_setup();
    let local = engine.add_task(OWNER, NewTask::new("Essay")).await.unwrap();
    gateway.set_latency(Some(Duration::from_millis(150)));

    let pass = engine.handle_connectivity_change(true).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Online, but the target is still temporary: queued, not sent
    engine
        .update_task(OWNER, &local.id, fields(json!({"completed": true})))
        .await
        .unwrap();
    pass.await.unwrap();

    let queue = engine.pending_queue().unwrap();
    assert_eq!(queue.len(), 1);
    let server_id = gateway.records(EntityKind::Task, OWNER)[0].id.clone();
    assert_eq!(queue[0].op.target(), &server_id);

    // The local edit is kept on the re-keyed record
    gateway.set_latency(None);
    gateway.set_offline(true);
    let tasks = engine.get_tasks(OWNER).await.unwrap();
    assert_eq!(tasks[0].id, server_id);
    assert_eq!(tasks[0].fields["completed"], json!(true));

    gateway.clear_failures();
    engine.sync_with_server().await.unwrap();
    assert_eq!(
        gateway.records(EntityKind::Task, OWNER)[0].fields["completed"],
        json!(true)
    );
}

#[tokio::test]
async fn test_queue_and_cache_survive_restart() {
    let temp = tempdir().unwrap();
    let db_path = temp.path().join("data").join("studysync.redb");
    let gateway = Arc::new(MemoryGateway::with_session(OWNER));

    let local_id = {
        let store = Arc::new(RedbStore::new(&db_path).unwrap());
        let engine = engine_on(
            store,
            gateway.clone(),
            Arc::new(ManualReachability::new(false)),
        );
        engine
            .add_task(OWNER, NewTask::new("Survives"))
            .await
            .unwrap()
            .id
    };

    let store = Arc::new(RedbStore::new(&db_path).unwrap());
    let engine = engine_on(store, gateway.clone(), Arc::new(ManualReachability::new(false)));

    let tasks = engine.get_tasks(OWNER).await.unwrap();
    assert_eq!(tasks[0].id, local_id);
    assert_eq!(engine.pending_queue().unwrap().len(), 1);

    reconnect(&engine).await;
    assert_eq!(gateway.records(EntityKind::Task, OWNER).len(), 1);
    assert!(engine.pending_queue().unwrap().is_empty());
}

#[tokio::test]
async fn test_online_writes_go_straight_through() {
    let gateway = Arc::new(MemoryGateway::with_session(OWNER));
    let engine = engine_on(
        Arc::new(MemoryStore::new()),
        gateway.clone(),
        Arc::new(ManualReachability::new(true)),
    );

    let task = engine.add_task(OWNER, NewTask::new("Live")).await.unwrap();
    assert!(!task.id.is_temporary());

    engine
        .update_task(OWNER, &task.id, fields(json!({"completed": true})))
        .await
        .unwrap();
    engine.delete_task(OWNER, &task.id).await.unwrap();

    let calls = gateway.calls();
    assert_eq!((calls.create, calls.update, calls.delete), (1, 1, 1));
    assert!(engine.pending_queue().unwrap().is_empty());
    assert!(engine.get_tasks(OWNER).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_offline_writes_are_all_kept() {
    let (engine, gateway, _) = offline_setup();

    let writes = (0..20).map(|i| {
        let engine = engine.clone();
        async move { engine.add_task(OWNER, NewTask::new(format!("Task {}", i))).await }
    });
    let created: Vec<_> = futures::future::join_all(writes)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(created.len(), 20);
    assert_eq!(engine.get_tasks(OWNER).await.unwrap().len(), 20);
    assert_eq!(engine.pending_queue().unwrap().len(), 20);

    reconnect(&engine).await;
    assert!(engine.pending_queue().unwrap().is_empty());
    assert_eq!(gateway.records(EntityKind::Task, OWNER).len(), 20);
}

#[tokio::test]
async fn test_refresh_racing_an_online_create_keeps_the_create() {
    let gateway = Arc::new(MemoryGateway::with_session(OWNER));
    let engine = engine_on(
        Arc::new(MemoryStore::new()),
        gateway.clone(),
        Arc::new(ManualReachability::new(true)),
    );
    gateway.set_latency(Some(Duration::from_millis(50)));

    // The listing is taken before the create lands and applied after it started
    let refresh = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.get_tasks(OWNER).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let created = engine.add_task(OWNER, NewTask::new("Essay")).await.unwrap();
    refresh.await.unwrap().unwrap();
    assert!(!created.id.is_temporary());

    engine.handle_connectivity_change(false);
    let cached = engine.get_tasks(OWNER).await.unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, created.id);
    assert!(engine.pending_queue().unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_temporary_id_after_confirmation() {
    let (engine, gateway, _) = offline_setup();
    let local = engine.add_task(OWNER, NewTask::new("Essay")).await.unwrap();
    reconnect(&engine).await;
    let server_id = engine.get_tasks(OWNER).await.unwrap()[0].id.clone();
    assert!(!server_id.is_temporary());

    // Online: goes straight to the server under the confirmed id
    let updated = engine
        .update_task(OWNER, &local.id, fields(json!({"completed": true})))
        .await
        .unwrap()
        .expect("cached under the server id");
    assert_eq!(updated.id, server_id);
    assert!(engine.pending_queue().unwrap().is_empty());
    assert_eq!(gateway.records(EntityKind::Task, OWNER)[0].fields["completed"], json!(true));

    // Offline: queued against the server id and drained by the next pass
    engine.handle_connectivity_change(false);
    engine.delete_task(OWNER, &local.id).await.unwrap();
    let queue = engine.pending_queue().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].op.target(), &server_id);
    assert!(engine.get_tasks(OWNER).await.unwrap().is_empty());

    reconnect(&engine).await;
    assert!(engine.pending_queue().unwrap().is_empty());
    assert!(gateway.records(EntityKind::Task, OWNER).is_empty());
}
