//! Foundation types for darkstar.
//!
//! Every record persisted by the darkstar database is a [`DarkObject`]: a
//! versioned, schema-flexible mapping of field names to typed [`Value`]s plus
//! commit metadata. Every other darkstar crate depends on `darkstar-types`.
//!
//! # Key Types
//!
//! - [`DarkObject`]: Versioned record envelope (revision, timestamp, checksum)
//! - [`Value`] / [`FieldType`]: Closed set of field value types
//! - [`Timestamp`]: Wall-clock milliseconds since the UNIX epoch
//! - [`TimeProvider`]: Injectable monotonic + wall clock source

pub mod error;
pub mod object;
pub mod time;
pub mod value;

pub use error::TypeError;
pub use object::DarkObject;
pub use time::{ManualClock, SystemClock, TimeProvider, Timestamp};
pub use value::{FieldMap, FieldType, Value};
