//! Engine events and sync outcome types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  EngineEvent: broadcast to every subscriber                     │
//! │  ├── ConnectivityChanged: online flag flipped                   │
//! │  ├── SyncStarted: a pass loaded its queue snapshot              │
//! │  ├── SyncFinished: pass ended (completed / skipped / aborted)   │
//! │  └── GuestMigrated: guest data handed to a real account         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::types::{EntityKind, RecordId};

/// Why a sync pass did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass holds the in-progress flag
    AlreadyRunning,
    Offline,
    /// Guest data is only moved by explicit migration
    GuestMode,
    EmptyQueue,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyRunning => write!(f, "sync already in progress"),
            SkipReason::Offline => write!(f, "offline"),
            SkipReason::GuestMode => write!(f, "guest mode"),
            SkipReason::EmptyQueue => write!(f, "queue empty"),
        }
    }
}

/// Per-pass counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries in the snapshot the pass started from
    pub snapshot_len: usize,
    /// Confirmed by the gateway and removed from the queue
    pub succeeded: usize,
    /// Rejected by the gateway; retried next pass
    pub failed: usize,
    /// Waiting on an unconfirmed create; not sent
    pub deferred: usize,
    /// Queue length after the pass (includes entries added mid-pass)
    pub remaining: usize,
}

/// Result of a call to `sync_with_server`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
    /// The pass could not start processing; queue untouched
    Aborted(String),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Result of `migrate_guest_data`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// False when the engine was not in guest mode
    pub performed: bool,
    pub migrated: usize,
    /// Records the gateway rejected; their local copies are gone
    pub failed: Vec<(EntityKind, RecordId)>,
}

/// Events emitted by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ConnectivityChanged { online: bool },
    SyncStarted { pending: usize },
    SyncFinished(SyncOutcome),
    GuestMigrated(MigrationReport),
}

impl EngineEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::ConnectivityChanged { .. } => "connectivity_changed",
            EngineEvent::SyncStarted { .. } => "sync_started",
            EngineEvent::SyncFinished(_) => "sync_finished",
            EngineEvent::GuestMigrated(_) => "guest_migrated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_report() {
        let report = SyncReport {
            snapshot_len: 3,
            succeeded: 2,
            failed: 1,
            deferred: 0,
            remaining: 1,
        };
        assert_eq!(
            SyncOutcome::Completed(report.clone()).report(),
            Some(&report)
        );
        assert!(SyncOutcome::Skipped(SkipReason::Offline).report().is_none());
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::AlreadyRunning.to_string(), "sync already in progress");
        assert_eq!(SkipReason::EmptyQueue.to_string(), "queue empty");
    }
}
