//! In-process gateway for tests and demos.
//!
//! [`MemoryGateway`] keeps one table per entity kind, assigns sequential
//! server ids, counts calls, and can be told to fail.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::RemoteGateway;
use crate::types::{EntityKind, Fields, Record, RecordId};

/// Calls received, per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    pub list: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub session: usize,
}

impl GatewayCalls {
    pub fn total(&self) -> usize {
        self.list + self.create + self.update + self.delete + self.session
    }
}

#[derive(Default)]
struct GatewayState {
    tables: HashMap<EntityKind, Vec<Record>>,
    next_id: u64,
    session: Option<String>,
    offline: bool,
    fail_next: usize,
    fail_targets: HashSet<RecordId>,
    latency: Option<Duration>,
    calls: GatewayCalls,
}

impl GatewayState {
    /// Decide whether a data call fails; session lookups never hit this.
    fn check_fault(&mut self, target: Option<&RecordId>) -> GatewayResult<()> {
        if self.offline {
            return Err(GatewayError::Network("gateway unreachable".into()));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(GatewayError::api(503, "injected failure"));
        }
        if let Some(id) = target {
            if self.fail_targets.contains(id) {
                return Err(GatewayError::api(500, format!("injected failure for {}", id)));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<GatewayState>,
}

impl MemoryGateway {
    /// Gateway with no session
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway whose session belongs to `user_id`
    pub fn with_session(user_id: impl Into<String>) -> Self {
        let gateway = Self::new();
        gateway.set_session(Some(user_id.into()));
        gateway
    }

    pub fn set_session(&self, user_id: Option<String>) {
        self.state.lock().session = user_id;
    }

    /// Fail every data call with a network error
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Fail the next `n` data calls
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    /// Fail every call aimed at `id` (for creates, the id on the sent record)
    pub fn fail_on(&self, id: RecordId) {
        self.state.lock().fail_targets.insert(id);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_next = 0;
        state.fail_targets.clear();
        state.offline = false;
    }

    /// Delay every data call
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    pub fn calls(&self) -> GatewayCalls {
        self.state.lock().calls
    }

    /// Server-side rows of `kind` for `owner_id`, in insertion order
    pub fn records(&self, kind: EntityKind, owner_id: &str) -> Vec<Record> {
        self.state
            .lock()
            .tables
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.user_id == owner_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Seed a row directly, bypassing counters and faults
    pub fn insert_server_record(&self, kind: EntityKind, record: Record) {
        self.state
            .lock()
            .tables
            .entry(kind)
            .or_default()
            .push(record);
    }

    async fn pause(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn list(&self, kind: EntityKind, owner_id: &str) -> GatewayResult<Vec<Record>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.calls.list += 1;
        state.check_fault(None)?;

        let mut rows: Vec<Record> = state
            .tables
            .get(&kind)
            .map(|rows| rows.iter().filter(|r| r.user_id == owner_id).cloned().collect())
            .unwrap_or_default();
        rows.reverse();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn create(
        &self,
        kind: EntityKind,
        record: &Record,
        owner_id: &str,
    ) -> GatewayResult<Record> {
        self.pause().await;
        let mut state = self.state.lock();
        state.calls.create += 1;
        state.check_fault(Some(&record.id))?;

        let id = if record.id.is_temporary() {
            state.next_id += 1;
            RecordId::new(state.next_id.to_string())
        } else {
            record.id.clone()
        };
        let table = state.tables.entry(kind).or_default();
        if table.iter().any(|r| r.id == id) {
            return Err(GatewayError::api(409, format!("duplicate key {}", id)));
        }

        let mut row = record.clone();
        row.id = id;
        row.user_id = owner_id.to_string();
        table.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        changes: &Fields,
        owner_id: &str,
    ) -> GatewayResult<Record> {
        self.pause().await;
        let mut state = self.state.lock();
        state.calls.update += 1;
        state.check_fault(Some(id))?;

        let row = state
            .tables
            .get_mut(&kind)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| &r.id == id && r.user_id == owner_id)
            })
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        row.apply_changes(changes);
        row.updated_at = Some(Utc::now());
        Ok(row.clone())
    }

    async fn delete(&self, kind: EntityKind, id: &RecordId, owner_id: &str) -> GatewayResult<()> {
        self.pause().await;
        let mut state = self.state.lock();
        state.calls.delete += 1;
        state.check_fault(Some(id))?;

        if let Some(rows) = state.tables.get_mut(&kind) {
            rows.retain(|r| !(&r.id == id && r.user_id == owner_id));
        }
        Ok(())
    }

    async fn current_user_id(&self) -> GatewayResult<Option<String>> {
        let mut state = self.state.lock();
        state.calls.session += 1;
        Ok(state.session.clone())
    }
}
