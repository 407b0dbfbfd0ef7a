use std::fmt;

use darkstar_types::DarkObject;

use crate::error::{DatabaseError, DatabaseResult};

/// Filter applied to each record during a scan.
pub type Predicate = Box<dyn Fn(&DarkObject) -> bool + Send>;

/// Resume point for a scan: the last key examined.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanCursor {
    after: Option<String>,
}

impl ScanCursor {
    /// A cursor positioned before the first key.
    pub fn start() -> Self {
        Self::default()
    }

    /// A cursor positioned just after `key`.
    pub fn after(key: impl Into<String>) -> Self {
        Self {
            after: Some(key.into()),
        }
    }

    pub fn last_key(&self) -> Option<&str> {
        self.after.as_deref()
    }
}

/// Lazy, key-ordered sequence of live records.
///
/// The underlying entries are captured when the scan starts, so commits made
/// while the scan is being consumed do not show up in it. Records are decoded
/// and filtered one at a time as the iterator advances; tombstones are
/// skipped.
pub struct Scan {
    table: String,
    entries: std::vec::IntoIter<(String, Vec<u8>)>,
    predicate: Predicate,
    cursor: ScanCursor,
}

impl Scan {
    pub(crate) fn new(
        table: &str,
        entries: Vec<(String, Vec<u8>)>,
        predicate: Predicate,
        cursor: ScanCursor,
    ) -> Self {
        Self {
            table: table.to_string(),
            entries: entries.into_iter(),
            predicate,
            cursor,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Where a fresh scan should resume to continue after this one.
    pub fn cursor(&self) -> ScanCursor {
        self.cursor.clone()
    }
}

impl Iterator for Scan {
    type Item = DatabaseResult<DarkObject>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, bytes) = self.entries.next()?;
            let decoded = DarkObject::decode(&bytes);
            self.cursor = ScanCursor::after(key.as_str());
            match decoded {
                Err(e) => return Some(Err(DatabaseError::corrupt(&self.table, &key, e))),
                Ok(obj) if obj.is_tombstone() => continue,
                Ok(obj) if (self.predicate)(&obj) => return Some(Ok(obj)),
                Ok(_) => continue,
            }
        }
    }
}

impl fmt::Debug for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scan")
            .field("table", &self.table)
            .field("remaining", &self.entries.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}
