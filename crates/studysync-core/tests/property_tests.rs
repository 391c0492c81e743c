//! Property-based tests for the cache and sync queue
//!
//! Uses proptest to check read-your-writes and FIFO replay under arbitrary
//! write sequences and failure patterns.

use std::sync::Arc;

use proptest::prelude::*;
use studysync_core::testing::MemoryGateway;
use studysync_core::{
    EntityKind, Fields, ManualReachability, MemoryStore, NewTask, OfflineEngine, RecordId,
};

const OWNER: &str = "prop-user";

// ============================================================================
// Strategy Generators
// ============================================================================

fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ]{1,40}")
        .expect("valid regex")
        .prop_filter("has a visible character", |s| !s.trim().is_empty())
}

/// Writes applied to a task collection while offline
#[derive(Debug, Clone)]
enum WriteOp {
    Create(String),
    Rename(usize, String),
    Delete(usize),
}

fn write_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => title_strategy().prop_map(WriteOp::Create),
            2 => (0..20usize, title_strategy()).prop_map(|(i, t)| WriteOp::Rename(i, t)),
            1 => (0..20usize).prop_map(WriteOp::Delete),
        ],
        0..max_ops,
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn offline_engine() -> (OfflineEngine, Arc<MemoryGateway>) {
    let gateway = Arc::new(MemoryGateway::with_session(OWNER));
    let engine = OfflineEngine::new(
        Arc::new(MemoryStore::new()),
        gateway.clone(),
        Arc::new(ManualReachability::new(false)),
    );
    (engine, gateway)
}

fn rename(title: &str) -> Fields {
    let mut changes = Fields::new();
    changes.insert("title".into(), title.into());
    changes
}

fn titles_by_id(records: &[studysync_core::Record]) -> Vec<(RecordId, String)> {
    records
        .iter()
        .map(|r| (r.id.clone(), r.field_str("title").unwrap_or_default().to_string()))
        .collect()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Offline reads always reflect every write made so far
    #[test]
    fn reads_reflect_writes(ops in write_ops_strategy(30)) {
        let rt = runtime();
        let (engine, gateway) = offline_engine();
        // In-order model of the collection: (id, title)
        let mut model: Vec<(RecordId, String)> = Vec::new();

        rt.block_on(async {
            for op in &ops {
                match op {
                    WriteOp::Create(title) => {
                        let record = engine.add_task(OWNER, NewTask::new(title.clone())).await.unwrap();
                        model.push((record.id, title.clone()));
                    }
                    WriteOp::Rename(i, title) if !model.is_empty() => {
                        let idx = i % model.len();
                        let id = model[idx].0.clone();
                        engine.update_task(OWNER, &id, rename(title)).await.unwrap();
                        model[idx].1 = title.clone();
                    }
                    WriteOp::Delete(i) if !model.is_empty() => {
                        let idx = i % model.len();
                        let id = model.remove(idx).0;
                        engine.delete_task(OWNER, &id).await.unwrap();
                    }
                    _ => {}
                }
            }
        });

        let records = rt.block_on(engine.get_tasks(OWNER)).unwrap();
        prop_assert_eq!(titles_by_id(&records), model);
        prop_assert_eq!(gateway.calls().total(), 0);
    }

    /// After one pass, exactly the failed creates remain queued, in order,
    /// and the rest reached the server in enqueue order
    #[test]
    fn replay_keeps_only_failures_in_order(
        batch in prop::collection::vec((title_strategy(), any::<bool>()), 1..15)
    ) {
        let rt = runtime();
        let (engine, gateway) = offline_engine();

        let mut failing = Vec::new();
        let mut landing = Vec::new();
        rt.block_on(async {
            for (title, fails) in &batch {
                let record = engine.add_task(OWNER, NewTask::new(title.clone())).await.unwrap();
                if *fails {
                    gateway.fail_on(record.id.clone());
                    failing.push(record.id);
                } else {
                    landing.push(title.clone());
                }
            }
            if let Some(pass) = engine.handle_connectivity_change(true) {
                pass.await.unwrap();
            }
        });

        let queued: Vec<RecordId> = engine
            .pending_queue()
            .unwrap()
            .into_iter()
            .map(|e| e.op.target().clone())
            .collect();
        prop_assert_eq!(queued, failing);

        let remote: Vec<String> = gateway
            .records(EntityKind::Task, OWNER)
            .iter()
            .map(|r| r.field_str("title").unwrap_or_default().to_string())
            .collect();
        prop_assert_eq!(remote, landing);
        prop_assert!(!engine.is_sync_in_progress());
    }
}
