//! Escrow ledger for darkstar.
//!
//! The auction house never moves money itself. It reserves a bidder's funds
//! with [`Ledger::hold`], and later either gives them back with
//! [`Ledger::release`] or pays them to the seller with [`Ledger::capture`].
//! Both settlement calls are idempotent so compensation paths can repeat them
//! safely.
//!
//! [`InMemoryLedger`] is the reference implementation used by tests and
//! single-process deployments.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{EscrowError, EscrowResult};
pub use memory::InMemoryLedger;
pub use traits::{HoldRef, HoldState, Ledger};
