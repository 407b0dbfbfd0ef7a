use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use darkstar_table::{FieldAccess, Schema, SchemaError};
use darkstar_types::{DarkObject, FieldMap, FieldType, Timestamp, Value};

use crate::error::{DeliveryError, DeliveryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParcelState {
    Pending,
    Claimed,
    Expired,
}

impl ParcelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ParcelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParcelState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown parcel state: {other}")),
        }
    }
}

/// Typed view of one `delivery_box` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parcel {
    pub parcel_id: String,
    pub sender_id: Option<String>,
    pub recipient_id: String,
    pub payload_ref: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub state: ParcelState,
    pub revision: u64,
}

impl Parcel {
    pub(crate) fn schema() -> Result<Schema, SchemaError> {
        Schema::builder(crate::delivery::TABLE_NAME, "parcel_id")
            .optional("sender_id", FieldType::String)
            .field("recipient_id", FieldType::String)
            .field("payload_ref", FieldType::String)
            .field("created_at", FieldType::Timestamp)
            .field("expires_at", FieldType::Timestamp)
            .optional("claimed_at", FieldType::Timestamp)
            .field("state", FieldType::String)
            .build()
    }

    /// When the parcel left `Pending`, if it has.
    pub fn settled_at(&self) -> Option<Timestamp> {
        match self.state {
            ParcelState::Pending => None,
            ParcelState::Claimed => self.claimed_at,
            ParcelState::Expired => Some(self.expires_at),
        }
    }

    pub fn from_object(obj: &DarkObject) -> DeliveryResult<Self> {
        let f = &obj.fields;
        Ok(Self {
            parcel_id: obj.key.clone(),
            sender_id: f.opt_str("sender_id")?.map(str::to_string),
            recipient_id: f.require_str("recipient_id")?.to_string(),
            payload_ref: f.require_str("payload_ref")?.to_string(),
            created_at: f.require_timestamp("created_at")?,
            expires_at: f.require_timestamp("expires_at")?,
            claimed_at: f.opt_timestamp("claimed_at")?,
            state: f
                .require_str("state")?
                .parse::<ParcelState>()
                .map_err(|reason| DeliveryError::Corrupt {
                    parcel_id: obj.key.clone(),
                    reason,
                })?,
            revision: obj.revision,
        })
    }

    pub(crate) fn to_fields(&self) -> FieldMap {
        let mut f = FieldMap::new();
        f.insert("parcel_id".into(), Value::from(self.parcel_id.as_str()));
        if let Some(sender) = &self.sender_id {
            f.insert("sender_id".into(), Value::from(sender.as_str()));
        }
        f.insert("recipient_id".into(), Value::from(self.recipient_id.as_str()));
        f.insert("payload_ref".into(), Value::from(self.payload_ref.as_str()));
        f.insert("created_at".into(), Value::Timestamp(self.created_at));
        f.insert("expires_at".into(), Value::Timestamp(self.expires_at));
        if let Some(at) = self.claimed_at {
            f.insert("claimed_at".into(), Value::Timestamp(at));
        }
        f.insert("state".into(), Value::from(self.state.as_str()));
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Parcel {
        Parcel {
            parcel_id: "p1".into(),
            sender_id: None,
            recipient_id: "rosa".into(),
            payload_ref: "gil:500".into(),
            created_at: Timestamp::from_millis(10),
            expires_at: Timestamp::from_millis(1_000),
            claimed_at: None,
            state: ParcelState::Pending,
            revision: 1,
        }
    }

    #[test]
    fn fields_satisfy_schema_and_read_back() {
        let parcel = pending();
        let fields = parcel.to_fields();
        Parcel::schema().unwrap().validate(&fields).unwrap();
        let obj = DarkObject::committed("p1", fields, 1, Timestamp::zero());
        assert_eq!(Parcel::from_object(&obj).unwrap(), parcel);
    }

    #[test]
    fn settled_at_by_state() {
        let mut parcel = pending();
        assert_eq!(parcel.settled_at(), None);

        parcel.state = ParcelState::Claimed;
        parcel.claimed_at = Some(Timestamp::from_millis(500));
        assert_eq!(parcel.settled_at(), Some(Timestamp::from_millis(500)));

        parcel.state = ParcelState::Expired;
        parcel.claimed_at = None;
        assert_eq!(parcel.settled_at(), Some(Timestamp::from_millis(1_000)));
    }

    #[test]
    fn unknown_stored_state_is_corrupt() {
        let mut fields = pending().to_fields();
        fields.insert("state".into(), Value::from("lost"));
        let obj = DarkObject::committed("p1", fields, 1, Timestamp::zero());
        match Parcel::from_object(&obj) {
            Err(DeliveryError::Corrupt { parcel_id, reason }) => {
                assert_eq!(parcel_id, "p1");
                assert!(reason.contains("lost"));
            }
            other => panic!("expected corrupt parcel, got {other:?}"),
        }
    }
}
