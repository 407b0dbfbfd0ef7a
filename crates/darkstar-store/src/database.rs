use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tracing::{debug, error, info};

use darkstar_broker::{Broker, ChangeEvent, ChangeKind};
use darkstar_types::{DarkObject, FieldMap, TimeProvider, Timestamp};

use crate::error::{DatabaseError, DatabaseResult, StoreError};
use crate::memory::InMemoryBackingStore;
use crate::scan::{Scan, ScanCursor};
use crate::traits::BackingStore;

/// Keyed store of [`DarkObject`]s partitioned into named tables.
///
/// Each table has a commit lock. A commit takes the lock, re-reads the
/// current revision, checks it against the caller's expectation, writes the
/// new revision to the backing store, publishes the change event, and only
/// then releases the lock. Reads do not take the lock.
pub struct Database {
    backing: Arc<dyn BackingStore>,
    broker: Arc<Broker>,
    clock: Arc<dyn TimeProvider>,
    tables: RwLock<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl Database {
    pub fn new(
        backing: Arc<dyn BackingStore>,
        broker: Arc<Broker>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            backing,
            broker,
            clock,
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    /// A database over a fresh in-memory store with its own broker.
    pub fn in_memory(clock: Arc<dyn TimeProvider>) -> Self {
        Self::new(
            Arc::new(InMemoryBackingStore::new()),
            Arc::new(Broker::new()),
            clock,
        )
    }

    /// Register a new table. Fails if the name is already taken.
    pub fn create_table(&self, name: &str) -> DatabaseResult<()> {
        validate_name("table", name)?;
        let mut tables = self.tables.write().map_err(poisoned)?;
        if tables.contains_key(name) {
            return Err(DatabaseError::TableExists(name.to_string()));
        }
        tables.insert(name.to_string(), Arc::new(Mutex::new(())));
        info!(table = name, "table created");
        Ok(())
    }

    /// Register a table if it is not registered yet.
    ///
    /// Used when reopening a persistent store whose tables already hold data.
    pub fn ensure_table(&self, name: &str) -> DatabaseResult<()> {
        match self.create_table(name) {
            Ok(()) | Err(DatabaseError::TableExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Registered table names, ascending.
    pub fn tables(&self) -> DatabaseResult<Vec<String>> {
        Ok(self.tables.read().map_err(poisoned)?.keys().cloned().collect())
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    /// Read the live record at `key`.
    pub fn get(&self, table: &str, key: &str) -> DatabaseResult<DarkObject> {
        self.table_lock(table)?;
        match self.load(table, key)? {
            Some(obj) if !obj.is_tombstone() => Ok(obj),
            _ => Err(not_found(table, key)),
        }
    }

    /// Read whatever is stored at `key`, tombstone included.
    pub fn get_including_tombstone(
        &self,
        table: &str,
        key: &str,
    ) -> DatabaseResult<Option<DarkObject>> {
        self.table_lock(table)?;
        self.load(table, key)
    }

    /// Compare-and-swap write.
    ///
    /// `expected_revision = None` means the key must not hold a live record
    /// (create-only); `Some(r)` means the live record must be at revision `r`.
    /// On mismatch returns [`DatabaseError::Conflict`] carrying the actual
    /// live revision. On success the new revision is exactly one more than
    /// whatever was stored before, tombstones included.
    pub fn put(
        &self,
        table: &str,
        key: &str,
        fields: FieldMap,
        expected_revision: Option<u64>,
    ) -> DatabaseResult<DarkObject> {
        validate_name("key", key)?;
        let lock = self.table_lock(table)?;
        let _guard = lock_commit(&lock)?;

        let current = self.load(table, key)?;
        let live = current
            .as_ref()
            .filter(|obj| !obj.is_tombstone())
            .map(|obj| obj.revision);
        if live != expected_revision {
            debug!(table, key, expected = ?expected_revision, actual = ?live, "revision conflict");
            return Err(DatabaseError::Conflict {
                table: table.to_string(),
                key: key.to_string(),
                expected: expected_revision,
                actual: live,
            });
        }

        let revision = current.map_or(0, |obj| obj.revision) + 1;
        let now = self.clock.now_wall();
        let obj = DarkObject::committed(key, fields, revision, now);
        self.write(table, &obj)?;

        let kind = if live.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.broker.publish(ChangeEvent::new(
            table,
            key,
            kind,
            revision,
            obj.fields.clone(),
            now,
        ));
        debug!(table, key, revision, %kind, "committed");
        Ok(obj)
    }

    /// Compare-and-swap logical delete.
    ///
    /// Writes a tombstone at the next revision and returns it. The tombstone
    /// keeps the revision history until [`purge_tombstones`](Self::purge_tombstones)
    /// removes it.
    pub fn delete(
        &self,
        table: &str,
        key: &str,
        expected_revision: u64,
    ) -> DatabaseResult<DarkObject> {
        let lock = self.table_lock(table)?;
        let _guard = lock_commit(&lock)?;

        let current = match self.load(table, key)? {
            Some(obj) if !obj.is_tombstone() => obj,
            _ => return Err(not_found(table, key)),
        };
        if current.revision != expected_revision {
            debug!(table, key, expected = expected_revision, actual = current.revision, "revision conflict");
            return Err(DatabaseError::Conflict {
                table: table.to_string(),
                key: key.to_string(),
                expected: Some(expected_revision),
                actual: Some(current.revision),
            });
        }

        let now = self.clock.now_wall();
        let tombstone = DarkObject::tombstone(key, current.revision + 1, now);
        self.write(table, &tombstone)?;

        self.broker.publish(ChangeEvent::new(
            table,
            key,
            ChangeKind::Delete,
            tombstone.revision,
            FieldMap::new(),
            now,
        ));
        debug!(table, key, revision = tombstone.revision, "deleted");
        Ok(tombstone)
    }

    /// Lazy scan of live records matching `predicate`, ascending by key.
    pub fn scan<P>(&self, table: &str, predicate: P) -> DatabaseResult<Scan>
    where
        P: Fn(&DarkObject) -> bool + Send + 'static,
    {
        self.scan_from(table, &ScanCursor::start(), predicate)
    }

    /// Like [`scan`](Self::scan), resuming after `cursor`.
    pub fn scan_from<P>(
        &self,
        table: &str,
        cursor: &ScanCursor,
        predicate: P,
    ) -> DatabaseResult<Scan>
    where
        P: Fn(&DarkObject) -> bool + Send + 'static,
    {
        let lock = self.table_lock(table)?;
        // Holding the commit lock while copying the entries gives a snapshot
        // that no half-finished commit can straddle.
        let entries = {
            let _guard = lock_commit(&lock)?;
            self.backing.scan_after(table, cursor.last_key())?
        };
        Ok(Scan::new(table, entries, Box::new(predicate), cursor.clone()))
    }

    /// Physically remove tombstones whose delete is at least `retention` old.
    /// Returns the number removed.
    pub fn purge_tombstones(
        &self,
        table: &str,
        now: Timestamp,
        retention: Duration,
    ) -> DatabaseResult<usize> {
        let lock = self.table_lock(table)?;
        let _guard = lock_commit(&lock)?;

        let mut purged = 0;
        for (key, bytes) in self.backing.scan(table)? {
            let obj = DarkObject::decode(&bytes).map_err(|e| DatabaseError::corrupt(table, &key, e))?;
            if obj.is_tombstone() && obj.updated_at.saturating_add(retention) <= now {
                self.backing.delete(table, &key).map_err(|e| {
                    error!(table, key = %key, error = %e, "tombstone purge failed");
                    e
                })?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(table, purged, "tombstones purged");
        }
        Ok(purged)
    }

    /// Physically remove the tombstone at `key` if it is still the one written
    /// at `revision`. A live record, a newer tombstone, or an absent key is
    /// left alone and reported as `false`.
    pub fn purge_tombstone(&self, table: &str, key: &str, revision: u64) -> DatabaseResult<bool> {
        let lock = self.table_lock(table)?;
        let _guard = lock_commit(&lock)?;

        match self.load(table, key)? {
            Some(obj) if obj.is_tombstone() && obj.revision == revision => {
                self.backing.delete(table, key)?;
                debug!(table, key, revision, "tombstone purged");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn table_lock(&self, table: &str) -> DatabaseResult<Arc<Mutex<()>>> {
        self.tables
            .read()
            .map_err(poisoned)?
            .get(table)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))
    }

    fn load(&self, table: &str, key: &str) -> DatabaseResult<Option<DarkObject>> {
        match self.backing.get(table, key)? {
            Some(bytes) => DarkObject::decode(&bytes)
                .map(Some)
                .map_err(|e| DatabaseError::corrupt(table, key, e)),
            None => Ok(None),
        }
    }

    fn write(&self, table: &str, obj: &DarkObject) -> DatabaseResult<()> {
        let bytes = obj
            .encode()
            .map_err(|e| StoreError::Encoding(e.to_string()))?;
        self.backing.put(table, &obj.key, &bytes).map_err(|e| {
            error!(table, key = %obj.key, revision = obj.revision, error = %e, "commit failed");
            DatabaseError::Storage(e)
        })
    }
}

fn lock_commit(lock: &Mutex<()>) -> DatabaseResult<MutexGuard<'_, ()>> {
    lock.lock().map_err(poisoned)
}

fn poisoned<E: fmt::Display>(e: E) -> DatabaseError {
    DatabaseError::Storage(StoreError::LockPoisoned(e.to_string()))
}

fn not_found(table: &str, key: &str) -> DatabaseError {
    DatabaseError::NotFound {
        table: table.to_string(),
        key: key.to_string(),
    }
}

fn validate_name(what: &str, name: &str) -> DatabaseResult<()> {
    if name.is_empty() {
        return Err(DatabaseError::InvalidName(format!("{what} must not be empty")));
    }
    Ok(())
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.tables().unwrap_or_default())
            .field("broker", &self.broker)
            .finish()
    }
}
