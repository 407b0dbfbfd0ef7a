use std::time::Duration;

use serde::{Deserialize, Serialize};

use darkstar_table::RetryPolicy;

/// Auction house tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionConfig {
    /// Listing lifetime when the seller does not choose one.
    pub listing_duration_secs: u64,
    /// Compare-and-swap attempts per bid or cancel before giving up.
    pub max_bid_attempts: u32,
    /// Monotonic time budget for one bid's retry loop.
    pub bid_deadline_ms: u64,
    /// How long settled listings stay readable before `purge_settled`.
    pub audit_retention_secs: u64,
}

impl AuctionConfig {
    pub fn listing_duration(&self) -> Duration {
        Duration::from_secs(self.listing_duration_secs)
    }

    pub fn bid_deadline(&self) -> Duration {
        Duration::from_millis(self.bid_deadline_ms)
    }

    pub fn audit_retention(&self) -> Duration {
        Duration::from_secs(self.audit_retention_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_bid_attempts).with_deadline(self.bid_deadline())
    }
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            listing_duration_secs: 24 * 60 * 60,
            max_bid_attempts: 8,
            bid_deadline_ms: 500,
            audit_retention_secs: 30 * 24 * 60 * 60,
        }
    }
}
