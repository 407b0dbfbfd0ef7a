use crate::error::StoreResult;

/// Pluggable key-value storage beneath the database.
///
/// Records are opaque bytes addressed by `(partition, key)`; the store never
/// interprets them. Implementations must satisfy these invariants:
/// - `put` is durable (to the backend's configured degree) when it returns.
/// - `scan_after` returns keys in ascending order and reflects a consistent
///   point in time.
/// - All I/O errors are propagated, never silently ignored.
pub trait BackingStore: Send + Sync {
    /// Read the bytes stored at `(partition, key)`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    fn get(&self, partition: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` at `(partition, key)`, replacing any previous value.
    fn put(&self, partition: &str, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Physically remove `(partition, key)`. Returns `true` if it existed.
    fn delete(&self, partition: &str, key: &str) -> StoreResult<bool>;

    /// All entries in `partition` with keys strictly greater than `after`
    /// (or all entries when `after` is `None`), in ascending key order.
    fn scan_after(&self, partition: &str, after: Option<&str>)
        -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// All entries in `partition`, in ascending key order.
    fn scan(&self, partition: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.scan_after(partition, None)
    }

    /// Names of partitions holding at least one entry.
    fn partitions(&self) -> StoreResult<Vec<String>>;
}
