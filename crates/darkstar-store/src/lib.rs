//! Record store for darkstar.
//!
//! The [`Database`] keeps [`DarkObject`](darkstar_types::DarkObject)s in named
//! tables on top of a pluggable [`BackingStore`]. Its only concurrency-control
//! primitive is a compare-and-swap on the record revision: every `put` and
//! `delete` states the revision it expects to replace and fails with
//! [`DatabaseError::Conflict`] if another writer got there first.
//!
//! # Backing Stores
//!
//! All backends implement the [`BackingStore`] trait:
//!
//! - [`InMemoryBackingStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`LogBackingStore`] -- append-only, CRC-framed file log replayed on open
//!
//! # Design Rules
//!
//! 1. A write is durable in the backing store before its change event is
//!    published; subscribers never observe an uncommitted write.
//! 2. Commits to one table are serialized, so per-key event order equals
//!    per-key commit order.
//! 3. Revisions increase by exactly one per commit and are never reset, not
//!    even across a delete and re-create.
//! 4. Backing-store faults surface as [`StoreError`], distinct from conflicts.

pub mod database;
pub mod error;
pub mod log;
pub mod memory;
pub mod scan;
pub mod traits;

pub use database::Database;
pub use error::{DatabaseError, DatabaseResult, StoreError, StoreResult};
pub use log::{LogBackingStore, LogConfig};
pub use memory::InMemoryBackingStore;
pub use scan::{Scan, ScanCursor};
pub use traits::BackingStore;
