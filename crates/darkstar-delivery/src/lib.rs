//! Delivery box for darkstar.
//!
//! Anything sent to a player lands here as a parcel. The recipient claims it
//! exactly once; unclaimed parcels expire after the retention window and
//! settled parcels are purged after a further grace period.
//!
//! The payload itself is opaque: a parcel only carries a `payload_ref` that
//! some other system knows how to resolve.

pub mod config;
pub mod delivery;
pub mod error;
pub mod parcel;

pub use config::DeliveryConfig;
pub use delivery::{DeliveryBox, SweepReport, TABLE_NAME};
pub use error::{DeliveryError, DeliveryResult};
pub use parcel::{Parcel, ParcelState};
