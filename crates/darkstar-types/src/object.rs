use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::time::Timestamp;
use crate::value::{FieldMap, Value};

/// Versioned record envelope.
///
/// Every persisted record is a `DarkObject`. The `revision` starts at 0 for
/// an uncommitted object and increases by exactly one on every commit to the
/// same key, including the tombstone write that logically deletes it.
///
/// The checksum is a BLAKE3 hash over the bincode encoding of
/// `(key, fields, revision, updated_at, deleted)` and is recomputed whenever
/// the database produces a new revision.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DarkObject {
    /// Opaque identifier, unique within a table.
    pub key: String,
    /// Field name to typed value mapping.
    pub fields: FieldMap,
    /// Commit counter for this key.
    pub revision: u64,
    /// Wall-clock time of the last commit.
    pub updated_at: Timestamp,
    /// `true` for a tombstone left behind by a logical delete.
    pub deleted: bool,
    /// Integrity hash over the envelope contents.
    pub checksum: [u8; 32],
}

impl DarkObject {
    /// Create an uncommitted object (revision 0).
    pub fn new(key: impl Into<String>, fields: FieldMap) -> Self {
        Self::committed(key, fields, 0, Timestamp::zero())
    }

    /// Build the envelope for a commit at `revision`.
    pub fn committed(
        key: impl Into<String>,
        fields: FieldMap,
        revision: u64,
        updated_at: Timestamp,
    ) -> Self {
        let mut obj = Self {
            key: key.into(),
            fields,
            revision,
            updated_at,
            deleted: false,
            checksum: [0; 32],
        };
        obj.checksum = obj.compute_checksum();
        obj
    }

    /// Build a tombstone at `revision`. Tombstones carry no fields.
    pub fn tombstone(key: impl Into<String>, revision: u64, deleted_at: Timestamp) -> Self {
        let mut obj = Self {
            key: key.into(),
            fields: FieldMap::new(),
            revision,
            updated_at: deleted_at,
            deleted: true,
            checksum: [0; 32],
        };
        obj.checksum = obj.compute_checksum();
        obj
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }

    /// Look up a field value by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Recompute the integrity hash from the current contents.
    pub fn compute_checksum(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"darkstar-object-v1:");
        let body = (
            &self.key,
            &self.fields,
            self.revision,
            self.updated_at,
            self.deleted,
        );
        // Encoding an in-memory tuple of plain data cannot fail; fall back to
        // hashing the key alone so the checksum is still deterministic.
        match bincode::serialize(&body) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(self.key.as_bytes()),
        };
        *hasher.finalize().as_bytes()
    }

    /// Returns `true` if the stored checksum matches the contents.
    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }

    /// Serialize for the backing store.
    pub fn encode(&self) -> Result<Vec<u8>, TypeError> {
        bincode::serialize(self).map_err(|e| TypeError::Encoding(e.to_string()))
    }

    /// Deserialize from backing-store bytes, verifying the checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self, TypeError> {
        let obj: Self =
            bincode::deserialize(bytes).map_err(|e| TypeError::Decoding(e.to_string()))?;
        let computed = obj.compute_checksum();
        if computed != obj.checksum {
            return Err(TypeError::ChecksumMismatch {
                key: obj.key.clone(),
                stored: hex::encode(obj.checksum),
                computed: hex::encode(computed),
            });
        }
        Ok(obj)
    }

    /// Human-readable JSON dump, for debugging and export.
    pub fn to_json(&self) -> Result<String, TypeError> {
        serde_json::to_string_pretty(self).map_err(|e| TypeError::Encoding(e.to_string()))
    }
}

impl fmt::Debug for DarkObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DarkObject")
            .field("key", &self.key)
            .field("revision", &self.revision)
            .field("updated_at", &self.updated_at)
            .field("deleted", &self.deleted)
            .field("fields", &self.fields)
            .field("checksum", &hex::encode(&self.checksum[..4]))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("a".into(), Value::Integer(1));
        fields.insert("b".into(), Value::from("x"));
        fields
    }

    #[test]
    fn new_object_starts_at_revision_zero() {
        let obj = DarkObject::new("k", sample_fields());
        assert_eq!(obj.revision, 0);
        assert!(!obj.is_tombstone());
        assert!(obj.verify_checksum());
    }

    #[test]
    fn encode_decode_preserves_fields() {
        let obj = DarkObject::committed("k", sample_fields(), 1, Timestamp::from_millis(500));
        let bytes = obj.encode().unwrap();
        let decoded = DarkObject::decode(&bytes).unwrap();
        assert_eq!(decoded, obj);
        assert_eq!(decoded.get("a"), Some(&Value::Integer(1)));
        assert_eq!(decoded.get("b"), Some(&Value::from("x")));
    }

    #[test]
    fn tampered_object_fails_checksum() {
        let mut obj = DarkObject::committed("k", sample_fields(), 3, Timestamp::from_millis(1));
        obj.fields.insert("a".into(), Value::Integer(2));
        assert!(!obj.verify_checksum());

        let bytes = obj.encode().unwrap();
        let err = DarkObject::decode(&bytes).unwrap_err();
        assert!(matches!(err, TypeError::ChecksumMismatch { .. }));
    }

    #[test]
    fn checksum_depends_on_revision() {
        let a = DarkObject::committed("k", sample_fields(), 1, Timestamp::zero());
        let b = DarkObject::committed("k", sample_fields(), 2, Timestamp::zero());
        assert_ne!(a.checksum, b.checksum);
    }

    #[test]
    fn tombstone_has_no_fields() {
        let t = DarkObject::tombstone("k", 4, Timestamp::from_millis(9));
        assert!(t.is_tombstone());
        assert!(t.fields.is_empty());
        assert_eq!(t.revision, 4);
        assert!(t.verify_checksum());
    }

    #[test]
    fn decode_garbage_is_error() {
        let err = DarkObject::decode(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, TypeError::Decoding(_)));
    }

    #[test]
    fn json_dump_contains_key() {
        let obj = DarkObject::new("listing-1", sample_fields());
        let json = obj.to_json().unwrap();
        assert!(json.contains("listing-1"));
    }
}
