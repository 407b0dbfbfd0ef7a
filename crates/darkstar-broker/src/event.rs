use std::fmt;

use serde::{Deserialize, Serialize};

use darkstar_types::{FieldMap, Timestamp};

/// Classification of a committed mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// First live revision of a key (including re-creation over a tombstone).
    Insert,
    /// A later revision of a live key.
    Update,
    /// A tombstone write.
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Insert => "Insert",
            Self::Update => "Update",
            Self::Delete => "Delete",
        };
        write!(f, "{s}")
    }
}

/// A committed change to a single record.
///
/// `fields_after` is the full field map as of `revision` (empty for deletes).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Broker-wide sequence number, assigned on publish.
    pub seq: u64,
    pub table: String,
    pub key: String,
    pub kind: ChangeKind,
    /// Revision the commit produced.
    pub revision: u64,
    pub fields_after: FieldMap,
    /// Wall-clock time of the commit.
    pub committed_at: Timestamp,
}

impl ChangeEvent {
    /// Build an unsequenced event; the broker stamps `seq` on publish.
    pub fn new(
        table: impl Into<String>,
        key: impl Into<String>,
        kind: ChangeKind,
        revision: u64,
        fields_after: FieldMap,
        committed_at: Timestamp,
    ) -> Self {
        Self {
            seq: 0,
            table: table.into(),
            key: key.into(),
            kind,
            revision,
            fields_after,
            committed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkstar_types::Value;

    #[test]
    fn change_kind_display() {
        assert_eq!(ChangeKind::Insert.to_string(), "Insert");
        assert_eq!(ChangeKind::Delete.to_string(), "Delete");
    }

    #[test]
    fn new_event_is_unsequenced() {
        let mut fields = FieldMap::new();
        fields.insert("state".into(), Value::from("Open"));
        let event = ChangeEvent::new(
            "auction_house",
            "l-1",
            ChangeKind::Update,
            2,
            fields,
            Timestamp::from_millis(10),
        );
        assert_eq!(event.seq, 0);
        assert_eq!(event.revision, 2);
        assert_eq!(event.fields_after.get("state"), Some(&Value::from("Open")));
    }

    #[test]
    fn bincode_roundtrip() {
        let event = ChangeEvent::new(
            "delivery_box",
            "p-9",
            ChangeKind::Delete,
            5,
            FieldMap::new(),
            Timestamp::from_millis(77),
        );
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: ChangeEvent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
