//! Schema-bound table over a [`Database`].

use std::sync::Arc;

use tracing::{debug, warn};

use darkstar_broker::{KeyPattern, Subscription};
use darkstar_store::{Database, Scan, ScanCursor};
use darkstar_types::{DarkObject, FieldMap, Value};

use crate::error::{SchemaError, TableResult};
use crate::schema::Schema;

/// Partial update: fields to set and fields to clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub set: FieldMap,
    pub unset: Vec<String>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.insert(field.to_string(), value.into());
        self
    }

    pub fn unset(mut self, field: &str) -> Self {
        self.unset.push(field.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// `base` with this patch applied. Unsets run before sets.
    pub fn apply(&self, base: &FieldMap) -> FieldMap {
        let mut merged = base.clone();
        for field in &self.unset {
            merged.remove(field);
        }
        for (field, value) in &self.set {
            merged.insert(field.clone(), value.clone());
        }
        merged
    }
}

/// A database table whose records all satisfy one [`Schema`].
///
/// Cheap to clone; clones share the database.
#[derive(Clone)]
pub struct Table {
    db: Arc<Database>,
    schema: Arc<Schema>,
}

impl Table {
    /// Bind `schema` to its table, creating the table if needed.
    pub fn open(db: Arc<Database>, schema: Schema) -> TableResult<Self> {
        db.ensure_table(schema.name())?;
        debug!(table = schema.name(), "table opened");
        Ok(Self {
            db,
            schema: Arc::new(schema),
        })
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Read the live record at `key`.
    pub fn get(&self, key: &str) -> TableResult<DarkObject> {
        Ok(self.db.get(self.name(), key)?)
    }

    /// Insert a new record. Fails with `Conflict` if `key` is live.
    ///
    /// The primary key field is filled from `key` when absent.
    pub fn create(&self, key: &str, fields: FieldMap) -> TableResult<DarkObject> {
        let fields = self.prepare(key, fields)?;
        Ok(self.db.put(self.name(), key, fields, None)?)
    }

    /// Read, merge `patch`, validate, and write back at the read revision.
    ///
    /// A concurrent writer surfaces as `Conflict`; nothing is retried here.
    pub fn update(&self, key: &str, patch: &Patch) -> TableResult<DarkObject> {
        let current = self.get(key)?;
        let merged = patch.apply(&current.fields);
        let merged = self.prepare(key, merged)?;
        Ok(self
            .db
            .put(self.name(), key, merged, Some(current.revision))?)
    }

    /// Overwrite the record at `key` if it is still at `expected_revision`.
    pub fn replace(
        &self,
        key: &str,
        fields: FieldMap,
        expected_revision: u64,
    ) -> TableResult<DarkObject> {
        let fields = self.prepare(key, fields)?;
        Ok(self
            .db
            .put(self.name(), key, fields, Some(expected_revision))?)
    }

    /// Delete whatever revision is currently live at `key`.
    pub fn delete(&self, key: &str) -> TableResult<()> {
        let current = self.get(key)?;
        self.delete_at(key, current.revision)?;
        Ok(())
    }

    /// Delete the record at `key` only if it is still at `expected_revision`.
    pub fn delete_at(&self, key: &str, expected_revision: u64) -> TableResult<DarkObject> {
        Ok(self.db.delete(self.name(), key, expected_revision)?)
    }

    /// Lazy scan of live records matching `predicate`, ascending by key.
    pub fn query<P>(&self, predicate: P) -> TableResult<Scan>
    where
        P: Fn(&DarkObject) -> bool + Send + 'static,
    {
        Ok(self.db.scan(self.name(), predicate)?)
    }

    /// Like [`query`](Self::query), resuming after `cursor`.
    pub fn query_from<P>(&self, cursor: &ScanCursor, predicate: P) -> TableResult<Scan>
    where
        P: Fn(&DarkObject) -> bool + Send + 'static,
    {
        Ok(self.db.scan_from(self.name(), cursor, predicate)?)
    }

    /// Change feed for keys in this table matching `pattern`.
    pub fn subscribe(&self, pattern: KeyPattern) -> TableResult<Subscription> {
        Ok(self.db.broker().subscribe(self.name(), pattern)?)
    }

    /// Fill the primary key and defaults, then validate.
    fn prepare(&self, key: &str, mut fields: FieldMap) -> TableResult<FieldMap> {
        let pk = self.schema.primary_key_field();
        match fields.get(pk) {
            None => {
                fields.insert(pk.to_string(), Value::from(key));
            }
            Some(Value::String(value)) if value == key => {}
            Some(other) => {
                let value = other
                    .as_str()
                    .map_or_else(|| other.field_type().to_string(), str::to_string);
                return Err(SchemaError::KeyMismatch {
                    key: key.to_string(),
                    value,
                }
                .into());
            }
        }
        self.schema.apply_defaults(&mut fields);
        if let Err(e) = self.schema.validate(&fields) {
            warn!(table = self.name(), key, error = %e, "schema rejected write");
            return Err(e.into());
        }
        Ok(fields)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name())
            .field("primary_key", &self.schema.primary_key_field())
            .finish()
    }
}
