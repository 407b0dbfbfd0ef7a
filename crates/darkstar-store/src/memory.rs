use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::traits::BackingStore;

type Partition = BTreeMap<String, Vec<u8>>;

/// In-memory, `BTreeMap`-based backing store.
///
/// Intended for tests and embedding. Each partition is an ordered map so
/// scans come back in key order without sorting. Data is lost on drop.
pub struct InMemoryBackingStore {
    partitions: RwLock<BTreeMap<String, Partition>>,
}

impl InMemoryBackingStore {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of entries across all partitions.
    pub fn len(&self) -> usize {
        self.partitions
            .read()
            .map(|p| p.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything.
    pub fn clear(&self) -> StoreResult<()> {
        self.partitions.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::LockPoisoned(e.to_string())
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for InMemoryBackingStore {
    fn get(&self, partition: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let map = self.partitions.read().map_err(poisoned)?;
        Ok(map.get(partition).and_then(|p| p.get(key)).cloned())
    }

    fn put(&self, partition: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut map = self.partitions.write().map_err(poisoned)?;
        map.entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, partition: &str, key: &str) -> StoreResult<bool> {
        let mut map = self.partitions.write().map_err(poisoned)?;
        let Some(part) = map.get_mut(partition) else {
            return Ok(false);
        };
        let existed = part.remove(key).is_some();
        if part.is_empty() {
            map.remove(partition);
        }
        Ok(existed)
    }

    fn scan_after(
        &self,
        partition: &str,
        after: Option<&str>,
    ) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let map = self.partitions.read().map_err(poisoned)?;
        let Some(part) = map.get(partition) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Unbounded,
        };
        Ok(part
            .range((lower, Bound::Unbounded))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn partitions(&self) -> StoreResult<Vec<String>> {
        let map = self.partitions.read().map_err(poisoned)?;
        Ok(map.keys().cloned().collect())
    }
}

impl std::fmt::Debug for InMemoryBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackingStore")
            .field("entry_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = InMemoryBackingStore::new();
        store.put("t", "k", b"v1").unwrap();
        assert_eq!(store.get("t", "k").unwrap(), Some(b"v1".to_vec()));

        store.put("t", "k", b"v2").unwrap();
        assert_eq!(store.get("t", "k").unwrap(), Some(b"v2".to_vec()));

        assert!(store.delete("t", "k").unwrap());
        assert!(!store.delete("t", "k").unwrap());
        assert!(store.get("t", "k").unwrap().is_none());
    }

    #[test]
    fn partitions_are_isolated() {
        let store = InMemoryBackingStore::new();
        store.put("a", "k", b"1").unwrap();
        store.put("b", "k", b"2").unwrap();
        assert_eq!(store.get("a", "k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("b", "k").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.partitions().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn scan_is_key_ordered() {
        let store = InMemoryBackingStore::new();
        for key in ["c", "a", "b"] {
            store.put("t", key, key.as_bytes()).unwrap();
        }
        let keys: Vec<String> = store.scan("t").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn scan_after_excludes_cursor_key() {
        let store = InMemoryBackingStore::new();
        for key in ["a", "b", "c"] {
            store.put("t", key, b"x").unwrap();
        }
        let keys: Vec<String> = store
            .scan_after("t", Some("a"))
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn scan_missing_partition_is_empty() {
        let store = InMemoryBackingStore::new();
        assert!(store.scan("nope").unwrap().is_empty());
    }

    #[test]
    fn empty_partition_is_dropped() {
        let store = InMemoryBackingStore::new();
        store.put("t", "k", b"v").unwrap();
        store.delete("t", "k").unwrap();
        assert!(store.partitions().unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn clear_removes_all() {
        let store = InMemoryBackingStore::new();
        store.put("t", "a", b"1").unwrap();
        store.put("u", "b", b"2").unwrap();
        assert_eq!(store.len(), 2);
        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn debug_format() {
        let store = InMemoryBackingStore::new();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryBackingStore"));
        assert!(debug.contains("entry_count"));
    }
}
