//! Table abstraction for darkstar.
//!
//! A [`Table`] binds a [`Schema`] to one database table. Every write is
//! validated against the schema before it reaches the database, and every
//! committed write is announced through the broker by the database itself.
//!
//! The table layer never retries. A [`TableError::Conflict`] goes straight
//! back to the caller: only domain logic knows whether reapplying an operation
//! to fresh state is safe. Domain tables drive their own bounded loops with a
//! [`RetryPolicy`].
//!
//! # Modules
//!
//! - [`schema`]: Field specs, the schema builder, and validation
//! - [`table`]: The [`Table`] itself and [`Patch`]
//! - [`access`]: [`FieldAccess`] typed accessors over field maps
//! - [`retry`]: [`RetryPolicy`] and [`RetryBudget`]

pub mod access;
pub mod error;
pub mod retry;
pub mod schema;
pub mod table;

pub use access::FieldAccess;
pub use error::{SchemaError, TableError, TableResult};
pub use retry::{RetryBudget, RetryPolicy};
pub use schema::{FieldSpec, Schema, SchemaBuilder};
pub use table::{Patch, Table};
