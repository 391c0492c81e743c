//! StudySync Core Library
//!
//! Offline-first cache and sync engine for the StudySync student app.
//!
//! ## Overview
//!
//! Tasks, mood entries, journal entries and AI notes are cached per owner in
//! a Local Store. Reads prefer the hosted backend and fall back to the cache;
//! writes land in the cache first and are replicated immediately when online
//! or queued for a later sync pass. Guest users work entirely locally until
//! they sign up, at which point their data is migrated once.
//!
//! ## Core Principles
//!
//! - **Local-first**: every read and write works offline
//! - **Ordered replay**: one FIFO queue across all entity kinds
//! - **Never throws on the network**: remote failures fall back or queue
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use studysync_core::{
//!     EngineConfig, ManualReachability, NewTask, OfflineEngine, PostgrestGateway,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load("studysync.json")?.with_env_overrides();
//!     let gateway = Arc::new(PostgrestGateway::new(&config.gateway)?);
//!     let reachability = Arc::new(ManualReachability::new(true));
//!     let engine = OfflineEngine::open(&config, gateway, reachability)?;
//!
//!     engine.add_task("user-1", NewTask::new("Finish essay")).await?;
//!     for task in engine.get_tasks("user-1").await? {
//!         println!("{}", task.label());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod network;
pub mod queue;
pub mod storage;
pub mod testing;
pub mod types;

// Re-exports
pub use config::{EngineConfig, GatewayConfig};
pub use engine::{ConnectivityState, OfflineEngine};
pub use error::{GatewayError, GatewayResult, SyncError, SyncResult};
pub use events::{EngineEvent, MigrationReport, SkipReason, SyncOutcome, SyncReport};
pub use gateway::{PostgrestGateway, RemoteGateway, UnconfiguredGateway};
pub use network::{probe_tcp, probe_url, ManualReachability, Reachability};
pub use queue::{SyncOp, SyncQueueEntry};
pub use storage::{LocalStore, MemoryStore, RedbStore};
pub use types::*;
