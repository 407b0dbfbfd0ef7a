use std::io;

use darkstar_types::TypeError;

/// Faults from a backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying storage medium.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record could not be decoded or failed its checksum.
    #[error("corrupt record {partition}/{key}: {reason}")]
    Corrupt {
        partition: String,
        key: String,
        reason: String,
    },

    /// A record could not be encoded for storage.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// An append failed and its partial frame could not be removed. The log
    /// refuses writes until it is compacted or reopened.
    #[error("record log unusable after failed append: {0}")]
    LogFailed(String),

    /// A lock guarding store state was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result alias for backing-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from database operations.
///
/// `Conflict` is an expected outcome of optimistic concurrency, not a fault:
/// the caller re-reads and decides whether to retry. `Storage` is a fault.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// No live record exists at this key.
    #[error("record not found: {table}/{key}")]
    NotFound { table: String, key: String },

    /// The expected revision did not match the current one.
    ///
    /// `actual` is the current live revision, `None` if no live record exists.
    #[error("revision conflict on {table}/{key}: expected {expected:?}, actual {actual:?}")]
    Conflict {
        table: String,
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// The table was never registered.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A table with this name is already registered.
    #[error("table already exists: {0}")]
    TableExists(String),

    /// Record keys and table names must be non-empty.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Backing-store fault.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl DatabaseError {
    /// `true` for conditions a caller may resolve by re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// The current revision reported by a conflict.
    pub fn conflict_revision(&self) -> Option<Option<u64>> {
        match self {
            Self::Conflict { actual, .. } => Some(*actual),
            _ => None,
        }
    }

    pub(crate) fn corrupt(table: &str, key: &str, err: TypeError) -> Self {
        Self::Storage(StoreError::Corrupt {
            partition: table.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        })
    }
}

/// Result alias for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
