//! Error types for table operations.

use thiserror::Error;

use darkstar_broker::BrokerError;
use darkstar_store::{DatabaseError, StoreError};
use darkstar_types::FieldType;

/// A record does not satisfy its table's schema. Caller bug; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A required field is absent.
    #[error("missing required field: {field}")]
    MissingField { field: String },

    /// A field holds a value of the wrong type.
    #[error("field {field}: expected {expected}, found {actual}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        actual: FieldType,
    },

    /// A field is not declared by the schema.
    #[error("unknown field: {field}")]
    UnknownField { field: String },

    /// The primary key field disagrees with the record key.
    #[error("primary key mismatch: record key {key}, field value {value}")]
    KeyMismatch { key: String, value: String },

    /// The schema definition itself is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// Errors that can occur during table operations.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("record not found: {table}/{key}")]
    NotFound { table: String, key: String },

    /// Another writer committed first; `actual` is the current revision.
    #[error("revision conflict on {table}/{key}: current revision {actual:?}")]
    Conflict {
        table: String,
        key: String,
        actual: Option<u64>,
    },

    #[error("storage error: {0}")]
    Storage(StoreError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Any other database failure (unknown table, invalid name, ...).
    #[error("database error: {0}")]
    Database(DatabaseError),
}

impl TableError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<DatabaseError> for TableError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { table, key } => Self::NotFound { table, key },
            DatabaseError::Conflict {
                table, key, actual, ..
            } => Self::Conflict { table, key, actual },
            DatabaseError::Storage(e) => Self::Storage(e),
            other => Self::Database(other),
        }
    }
}

/// Convenience type alias for table operations.
pub type TableResult<T> = std::result::Result<T, TableError>;
