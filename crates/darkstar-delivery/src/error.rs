use darkstar_table::{SchemaError, TableError};
use darkstar_types::Timestamp;

/// Errors returned by delivery box operations.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("parcel not found: {0}")]
    NotFound(String),

    #[error("parcel {parcel_id} already claimed at {claimed_at}")]
    AlreadyClaimed {
        parcel_id: String,
        claimed_at: Timestamp,
    },

    #[error("{claimant} is not the recipient of parcel {parcel_id}")]
    NotRecipient { parcel_id: String, claimant: String },

    #[error("parcel {parcel_id} expired at {expires_at}")]
    Expired {
        parcel_id: String,
        expires_at: Timestamp,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("parcel {parcel_id} is corrupt: {reason}")]
    Corrupt { parcel_id: String, reason: String },

    #[error("contention on parcel {parcel_id} after {attempts} attempts")]
    Contention { parcel_id: String, attempts: u32 },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("table error: {0}")]
    Table(TableError),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
}

impl From<TableError> for DeliveryError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::NotFound { key, .. } => Self::NotFound(key),
            TableError::Schema(e) => Self::Schema(e),
            other => Self::Table(other),
        }
    }
}

pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;
