use std::time::Duration;

use serde::{Deserialize, Serialize};

use darkstar_table::RetryPolicy;

/// Delivery box tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// How long a parcel waits to be claimed before it expires.
    pub retention_secs: u64,
    /// How long claimed or expired parcels are kept before purging.
    pub purge_grace_secs: u64,
    pub max_claim_attempts: u32,
    pub claim_deadline_ms: u64,
}

impl DeliveryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn purge_grace(&self) -> Duration {
        Duration::from_secs(self.purge_grace_secs)
    }

    pub fn claim_deadline(&self) -> Duration {
        Duration::from_millis(self.claim_deadline_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_claim_attempts).with_deadline(self.claim_deadline())
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retention_secs: 30 * 24 * 60 * 60,
            purge_grace_secs: 7 * 24 * 60 * 60,
            max_claim_attempts: 8,
            claim_deadline_ms: 500,
        }
    }
}
