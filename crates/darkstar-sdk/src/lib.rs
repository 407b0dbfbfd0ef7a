//! High-level API for darkstar.
//!
//! [`Darkstar`] wires a clock, backing store, broker, database, and escrow
//! ledger into the two domain tables and exposes a single maintenance entry
//! point, [`Darkstar::sweep`]. A [`SweepScheduler`] drives that sweep on a
//! tokio interval.
//!
//! ```no_run
//! use std::sync::Arc;
//! use darkstar_sdk::{Darkstar, DarkstarConfig, SweepScheduler};
//!
//! # async fn run() -> darkstar_sdk::SdkResult<()> {
//! let config = DarkstarConfig::load("darkstar.toml")?;
//! darkstar_sdk::telemetry::init_tracing(&config.log);
//! let node = Arc::new(Darkstar::open(config)?);
//! let interval = node.config().scheduler.interval();
//! let scheduler = SweepScheduler::spawn(Arc::clone(&node), interval)?;
//! // ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod scheduler;
pub mod telemetry;

pub use config::{DarkstarConfig, LogConfig, SchedulerConfig, StorageBackend, StorageConfig};
pub use error::{SdkError, SdkResult};
pub use node::{Darkstar, MaintenanceReport};
pub use scheduler::{SchedulerHandle, SweepScheduler};

pub use darkstar_auction::{AuctionConfig, AuctionError, AuctionHouse, Listing, ListingState};
pub use darkstar_delivery::{DeliveryBox, DeliveryConfig, DeliveryError, Parcel, ParcelState};
pub use darkstar_escrow::{HoldRef, InMemoryLedger, Ledger};
pub use darkstar_types::{ManualClock, SystemClock, TimeProvider, Timestamp};
