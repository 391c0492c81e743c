//! Logging setup with optional JSONL capture.
//!
//! Console output goes to stderr through `tracing_subscriber::fmt`. When a
//! logs directory is configured, every event is also appended as one JSON
//! object per line to `<logs_dir>/<date>_<instance>.jsonl`.
//!
//! ```ignore
//! use studysync_core::logging::LoggingBuilder;
//!
//! LoggingBuilder::new(LoggingBuilder::filter_for_verbosity(1))
//!     .with_jsonl("./logs", "phone")
//!     .init()?;
//! ```
//!
//! ```bash
//! # Every swallowed remote failure
//! jq 'select(.level == "warn")' logs/*.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::LogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use writer::{read_entries, LogFileWriter};
