use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EscrowError, EscrowResult};

/// Handle to a reservation of funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HoldRef(Uuid);

impl HoldRef {
    /// A fresh, time-ordered hold id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for HoldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hold:{}", self.0)
    }
}

impl FromStr for HoldRef {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("hold:").unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| EscrowError::InvalidHoldRef(s.to_string()))
    }
}

/// Where a hold is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldState {
    Active,
    Released,
    Captured { to: String },
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Released => write!(f, "released"),
            Self::Captured { to } => write!(f, "captured to {to}"),
        }
    }
}

/// Fund-movement boundary consumed by the auction house.
pub trait Ledger: Send + Sync {
    /// Move `amount` from the account's available balance into a new hold.
    fn hold(&self, account: &str, amount: u64) -> EscrowResult<HoldRef>;

    /// Return held funds to the holder. Releasing twice is an Ack.
    fn release(&self, hold: HoldRef) -> EscrowResult<()>;

    /// Pay held funds to `to_account`. Capturing twice to the same account
    /// is an Ack and moves nothing the second time.
    fn capture(&self, hold: HoldRef, to_account: &str) -> EscrowResult<()>;

    /// Available (unheld) balance.
    fn balance(&self, account: &str) -> EscrowResult<u64>;

    fn hold_state(&self, hold: HoldRef) -> EscrowResult<HoldState>;
}
