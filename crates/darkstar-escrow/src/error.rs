use crate::traits::{HoldRef, HoldState};

/// Errors produced by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscrowError {
    #[error("insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: u64,
        available: u64,
    },

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("account already exists: {0}")]
    AccountExists(String),

    #[error("unknown hold: {0}")]
    UnknownHold(HoldRef),

    /// The hold was already settled the other way.
    #[error("hold {hold} already {state}")]
    HoldSettled { hold: HoldRef, state: HoldState },

    #[error("invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("invalid hold reference: {0}")]
    InvalidHoldRef(String),

    #[error("balance overflow in {0}")]
    Overflow(String),

    #[error("ledger lock poisoned")]
    LockPoisoned,
}

pub type EscrowResult<T> = std::result::Result<T, EscrowError>;
