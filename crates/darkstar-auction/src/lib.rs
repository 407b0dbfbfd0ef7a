//! Auction house for darkstar.
//!
//! Sellers list items; bidders compete with escrowed funds; a periodic sweep
//! settles listings whose time has run out. Every state change goes through
//! a compare-and-swap write on the listing's revision, so concurrent bids,
//! cancellations, and sweeps resolve to exactly one winner per revision.
//!
//! ```text
//!          place_bid (loop)
//!            ┌─────┐
//!            ▼     │
//!   ──────▶ Open ──┘
//!            │
//!            ├── sweep, has bid ───▶ Sold       (escrow captured to seller)
//!            ├── sweep, no bid ────▶ Expired
//!            └── cancel by seller ─▶ Cancelled  (escrow released)
//! ```

pub mod config;
pub mod error;
pub mod house;
pub mod listing;

pub use config::AuctionConfig;
pub use error::{AuctionError, AuctionResult};
pub use house::{AuctionHouse, SweepReport, TABLE_NAME};
pub use listing::{Listing, ListingState};
