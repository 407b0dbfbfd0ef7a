//! Change-event broker for darkstar.
//!
//! The broker is an in-memory publish/subscribe bus. The database publishes a
//! [`ChangeEvent`] after every committed insert, update, or delete, and the
//! broker fans it out to every live [`Subscription`] whose table and
//! [`KeyPattern`] match.
//!
//! # Guarantees
//!
//! - Per key, every subscriber sees events in commit order with no gaps or
//!   duplicates (each subscriber owns an unbounded channel).
//! - No replay: a subscriber only sees events published while it is live.
//! - The broker holds no durable state. It can be cleared or restarted at any
//!   time; consumers reconcile from the database, not from the stream.

pub mod broker;
pub mod error;
pub mod event;
pub mod pattern;

pub use broker::{Broker, Subscription, SubscriptionId};
pub use error::{BrokerError, Result};
pub use event::{ChangeEvent, ChangeKind};
pub use pattern::KeyPattern;
