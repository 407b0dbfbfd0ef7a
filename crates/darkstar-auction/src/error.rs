use darkstar_escrow::EscrowError;
use darkstar_table::{SchemaError, TableError};
use darkstar_types::Timestamp;

use crate::listing::ListingState;

/// Errors returned by auction house operations.
///
/// Business-rule kinds are separate variants so callers such as a settlement
/// job can branch on them.
#[derive(Debug, thiserror::Error)]
pub enum AuctionError {
    #[error("listing not found: {0}")]
    NotFound(String),

    #[error("listing {listing_id} is {state}")]
    InvalidState {
        listing_id: String,
        state: ListingState,
    },

    #[error("listing {listing_id} expired at {expires_at}")]
    Expired {
        listing_id: String,
        expires_at: Timestamp,
    },

    #[error("bid {amount} on {listing_id} must exceed {minimum}")]
    BidTooLow {
        listing_id: String,
        amount: u64,
        minimum: u64,
    },

    #[error("seller cannot bid on own listing {0}")]
    SellerCannotBid(String),

    #[error("{account} is not the seller of {listing_id}")]
    NotSeller { listing_id: String, account: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored listing holds values no writer produces.
    #[error("listing {listing_id} is corrupt: {reason}")]
    Corrupt { listing_id: String, reason: String },

    /// The retry budget ran out while other writers kept winning.
    #[error("contention on {listing_id} after {attempts} attempts")]
    Contention { listing_id: String, attempts: u32 },

    #[error("insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: u64,
        available: u64,
    },

    #[error("escrow error: {0}")]
    Escrow(EscrowError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("table error: {0}")]
    Table(TableError),
}

impl AuctionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
}

impl From<EscrowError> for AuctionError {
    fn from(err: EscrowError) -> Self {
        match err {
            EscrowError::InsufficientFunds {
                account,
                requested,
                available,
            } => Self::InsufficientFunds {
                account,
                requested,
                available,
            },
            other => Self::Escrow(other),
        }
    }
}

impl From<TableError> for AuctionError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::NotFound { key, .. } => Self::NotFound(key),
            TableError::Schema(e) => Self::Schema(e),
            other => Self::Table(other),
        }
    }
}

pub type AuctionResult<T> = std::result::Result<T, AuctionError>;
