//! Error types for StudySync
//!
//! Two layers: [`SyncError`] covers faults the engine surfaces to callers
//! (local storage, configuration, guest-mode preconditions), while
//! [`GatewayError`] stays at the remote boundary and is never propagated
//! out of a read or write path.

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Error during storage operations
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// A cached value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A draft or change set failed validation before reaching the cache
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Guest migration was requested with an unusable target identity
    #[error("Guest migration error: {0}")]
    Migration(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

/// Failure reported by a [`RemoteGateway`](crate::gateway::RemoteGateway) call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Transport failure (DNS, connect, timeout, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No authenticated session is available
    #[error("Not authenticated")]
    Unauthenticated,

    /// The backend answered with a body we could not interpret
    #[error("Decode error: {0}")]
    Decode(String),

    /// The target record does not exist remotely
    #[error("Record not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether retrying the same request later can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => matches!(*status, 408 | 425 | 429 | 500..=599),
            Self::Unauthenticated => true,
            Self::Decode(_) | Self::NotFound(_) => false,
        }
    }
}

/// Result type alias for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;
