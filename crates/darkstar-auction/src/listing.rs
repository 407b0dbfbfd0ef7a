use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use darkstar_escrow::HoldRef;
use darkstar_table::{FieldAccess, Schema, SchemaError};
use darkstar_types::{DarkObject, FieldMap, FieldType, Timestamp, Value};

use crate::error::{AuctionError, AuctionResult};

/// Lifecycle of a listing. Only `Open` has outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingState {
    Open,
    Sold,
    Expired,
    Cancelled,
}

impl ListingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Sold => "sold",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for ListingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "sold" => Ok(Self::Sold),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown listing state: {other}")),
        }
    }
}

/// Typed view of one `auction_house` record.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub listing_id: String,
    pub seller_id: String,
    pub item_ref: String,
    /// Stack size.
    pub quantity: u32,
    pub starting_price: u64,
    pub current_bid: Option<u64>,
    pub current_bidder_id: Option<String>,
    pub escrow_hold: Option<HoldRef>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub settled_at: Option<Timestamp>,
    pub state: ListingState,
    /// Revision of the record this view was read from.
    pub revision: u64,
}

impl Listing {
    pub(crate) fn schema() -> Result<Schema, SchemaError> {
        Schema::builder(crate::house::TABLE_NAME, "listing_id")
            .field("seller_id", FieldType::String)
            .field("item_ref", FieldType::String)
            .field("quantity", FieldType::Integer)
            .field("starting_price", FieldType::Integer)
            .optional("current_bid", FieldType::Integer)
            .optional("current_bidder_id", FieldType::String)
            .optional("escrow_hold", FieldType::String)
            .field("created_at", FieldType::Timestamp)
            .field("expires_at", FieldType::Timestamp)
            .optional("settled_at", FieldType::Timestamp)
            .field("state", FieldType::String)
            .build()
    }

    /// A bid must be strictly greater than this.
    pub fn minimum_bid(&self) -> u64 {
        self.current_bid.unwrap_or(self.starting_price)
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Decode a stored record. Values no writer could have produced, such as
    /// an unknown state or a negative price, are reported as `Corrupt`.
    pub fn from_object(obj: &DarkObject) -> AuctionResult<Self> {
        let f = &obj.fields;
        let corrupt = |reason: String| AuctionError::Corrupt {
            listing_id: obj.key.clone(),
            reason,
        };
        let state = f
            .require_str("state")?
            .parse::<ListingState>()
            .map_err(corrupt)?;
        let escrow_hold = f
            .opt_str("escrow_hold")?
            .map(str::parse::<HoldRef>)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        let unsigned = |field: &str, value: i64| {
            u64::try_from(value).map_err(|_| corrupt(format!("{field} out of range: {value}")))
        };
        let quantity = f.require_i64("quantity")?;
        Ok(Self {
            listing_id: obj.key.clone(),
            seller_id: f.require_str("seller_id")?.to_string(),
            item_ref: f.require_str("item_ref")?.to_string(),
            quantity: u32::try_from(quantity)
                .map_err(|_| corrupt(format!("quantity out of range: {quantity}")))?,
            starting_price: unsigned("starting_price", f.require_i64("starting_price")?)?,
            current_bid: f
                .opt_i64("current_bid")?
                .map(|v| unsigned("current_bid", v))
                .transpose()?,
            current_bidder_id: f.opt_str("current_bidder_id")?.map(str::to_string),
            escrow_hold,
            created_at: f.require_timestamp("created_at")?,
            expires_at: f.require_timestamp("expires_at")?,
            settled_at: f.opt_timestamp("settled_at")?,
            state,
            revision: obj.revision,
        })
    }

    pub(crate) fn to_fields(&self) -> AuctionResult<FieldMap> {
        let mut f = FieldMap::new();
        f.insert("listing_id".into(), Value::from(self.listing_id.as_str()));
        f.insert("seller_id".into(), Value::from(self.seller_id.as_str()));
        f.insert("item_ref".into(), Value::from(self.item_ref.as_str()));
        f.insert("quantity".into(), Value::Integer(i64::from(self.quantity)));
        f.insert(
            "starting_price".into(),
            Value::Integer(to_signed("starting_price", self.starting_price)?),
        );
        if let Some(bid) = self.current_bid {
            f.insert("current_bid".into(), Value::Integer(to_signed("current_bid", bid)?));
        }
        if let Some(bidder) = &self.current_bidder_id {
            f.insert("current_bidder_id".into(), Value::from(bidder.as_str()));
        }
        if let Some(hold) = &self.escrow_hold {
            f.insert("escrow_hold".into(), Value::String(hold.to_string()));
        }
        f.insert("created_at".into(), Value::Timestamp(self.created_at));
        f.insert("expires_at".into(), Value::Timestamp(self.expires_at));
        if let Some(at) = self.settled_at {
            f.insert("settled_at".into(), Value::Timestamp(at));
        }
        f.insert("state".into(), Value::from(self.state.as_str()));
        Ok(f)
    }
}

pub(crate) fn to_signed(field: &str, value: u64) -> AuctionResult<i64> {
    i64::try_from(value)
        .map_err(|_| AuctionError::InvalidArgument(format!("{field} out of range: {value}")))
}
