//! The delivery box table and its claim protocol.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use darkstar_store::Database;
use darkstar_table::{Table, TableError};
use darkstar_types::{TimeProvider, Timestamp, Value};

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::parcel::{Parcel, ParcelState};

pub const TABLE_NAME: &str = "delivery_box";

/// Outcome counts from one [`DeliveryBox::sweep_expired`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    /// Claimed or expired by someone else first.
    pub skipped: usize,
    pub contended: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parcels waiting for their recipients.
pub struct DeliveryBox {
    table: Table,
    clock: Arc<dyn TimeProvider>,
    config: DeliveryConfig,
}

impl DeliveryBox {
    /// Open the `delivery_box` table on `db`, creating it if needed.
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn TimeProvider>,
        config: DeliveryConfig,
    ) -> DeliveryResult<Self> {
        let table = Table::open(db, Parcel::schema()?)?;
        Ok(Self {
            table,
            clock,
            config,
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Deliver `payload_ref` to `recipient_id`. Returns the new parcel id.
    ///
    /// Sending the same payload twice creates two parcels.
    pub fn send(&self, recipient_id: &str, payload_ref: &str) -> DeliveryResult<String> {
        self.deliver(None, recipient_id, payload_ref)
    }

    /// Like [`send`](Self::send), recording who sent it.
    pub fn send_from(
        &self,
        sender_id: &str,
        recipient_id: &str,
        payload_ref: &str,
    ) -> DeliveryResult<String> {
        if sender_id.is_empty() {
            return Err(DeliveryError::InvalidArgument("sender must not be empty".into()));
        }
        self.deliver(Some(sender_id), recipient_id, payload_ref)
    }

    pub fn parcel(&self, parcel_id: &str) -> DeliveryResult<Parcel> {
        Parcel::from_object(&self.table.get(parcel_id)?)
    }

    /// Unexpired pending parcels for `recipient_id`, oldest first.
    pub fn inbox(&self, recipient_id: &str) -> DeliveryResult<Vec<Parcel>> {
        let now = self.clock.now_wall();
        let recipient = recipient_id.to_string();
        let pending = ParcelState::Pending.as_str();
        let scan = self.table.query(move |obj| {
            obj.get("state").and_then(Value::as_str) == Some(pending)
                && obj.get("recipient_id").and_then(Value::as_str) == Some(recipient.as_str())
        })?;

        let mut parcels = Vec::new();
        for item in scan {
            let parcel = Parcel::from_object(&item.map_err(TableError::from)?)?;
            if now < parcel.expires_at {
                parcels.push(parcel);
            }
        }
        parcels.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.parcel_id.cmp(&b.parcel_id))
        });
        Ok(parcels)
    }

    /// Take ownership of a pending parcel. Returns its payload reference.
    ///
    /// Every attempt re-reads the parcel and re-checks it before writing at
    /// the read revision, so among any number of concurrent claims exactly one
    /// succeeds and the rest see `AlreadyClaimed`.
    pub fn claim(&self, parcel_id: &str, claimant_id: &str) -> DeliveryResult<String> {
        let mut budget = self.config.retry_policy().start(self.clock.as_ref());
        while budget.next_attempt() {
            let parcel = self.parcel(parcel_id)?;
            if parcel.recipient_id != claimant_id {
                warn!(parcel_id, claimant_id, "claim by non-recipient refused");
                return Err(DeliveryError::NotRecipient {
                    parcel_id: parcel_id.to_string(),
                    claimant: claimant_id.to_string(),
                });
            }
            let now = self.clock.now_wall();
            match parcel.state {
                ParcelState::Claimed => {
                    return Err(DeliveryError::AlreadyClaimed {
                        parcel_id: parcel_id.to_string(),
                        claimed_at: parcel.claimed_at.unwrap_or(parcel.created_at),
                    })
                }
                ParcelState::Expired => return Err(expired(&parcel)),
                ParcelState::Pending if now >= parcel.expires_at => return Err(expired(&parcel)),
                ParcelState::Pending => {}
            }

            let mut next = parcel.clone();
            next.state = ParcelState::Claimed;
            next.claimed_at = Some(now);
            match self.table.replace(parcel_id, next.to_fields(), parcel.revision) {
                Ok(obj) => {
                    info!(parcel_id, claimant_id, revision = obj.revision, "parcel claimed");
                    return Ok(parcel.payload_ref);
                }
                Err(TableError::Conflict { .. }) => {
                    debug!(parcel_id, attempt = budget.attempts(), "claim conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(parcel_id, attempts = budget.attempts(), "claim abandoned under contention");
        Err(DeliveryError::Contention {
            parcel_id: parcel_id.to_string(),
            attempts: budget.attempts(),
        })
    }

    /// Move pending parcels whose deadline is at or before `now` to `Expired`.
    /// Claimed parcels are never touched.
    pub fn sweep_expired(&self, now: Timestamp) -> DeliveryResult<SweepReport> {
        let pending = ParcelState::Pending.as_str();
        let scan = self.table.query(move |obj| {
            obj.get("state").and_then(Value::as_str) == Some(pending)
                && obj
                    .get("expires_at")
                    .and_then(Value::as_timestamp)
                    .is_some_and(|at| at <= now)
        })?;

        let mut report = SweepReport::default();
        let mut due = Vec::new();
        for item in scan {
            match item {
                Ok(obj) => due.push(obj.key),
                Err(e) => {
                    error!(table = TABLE_NAME, error = %e, "unreadable parcel during sweep");
                    report.failed += 1;
                }
            }
        }

        for parcel_id in due {
            match self.expire(&parcel_id, now) {
                Ok(true) => report.expired += 1,
                Ok(false) => report.skipped += 1,
                Err(DeliveryError::Contention { .. }) => report.contended += 1,
                Err(e) => {
                    error!(parcel_id = %parcel_id, error = %e, "parcel expiry failed");
                    report.failed += 1;
                }
            }
        }

        if !report.is_empty() {
            info!(
                expired = report.expired,
                skipped = report.skipped,
                contended = report.contended,
                failed = report.failed,
                "delivery sweep complete"
            );
        }
        Ok(report)
    }

    /// Physically remove claimed and expired parcels whose terminal time is
    /// at least `purge_grace` before `now`. Returns the number removed.
    ///
    /// Only the tombstones written by this pass are dropped; other deletes in
    /// the table wait out the storage tombstone retention.
    pub fn purge(&self, now: Timestamp) -> DeliveryResult<usize> {
        let grace = self.config.purge_grace();
        let pending = ParcelState::Pending.as_str();
        let scan = self
            .table
            .query(move |obj| obj.get("state").and_then(Value::as_str) != Some(pending))?;

        let mut purged = 0;
        for item in scan {
            let parcel = Parcel::from_object(&item.map_err(TableError::from)?)?;
            let due = parcel
                .settled_at()
                .is_some_and(|at| at.saturating_add(grace) <= now);
            if !due {
                continue;
            }
            match self.table.delete_at(&parcel.parcel_id, parcel.revision) {
                Ok(tombstone) => {
                    self.table
                        .database()
                        .purge_tombstone(TABLE_NAME, &parcel.parcel_id, tombstone.revision)
                        .map_err(TableError::from)?;
                    purged += 1;
                }
                Err(TableError::Conflict { .. } | TableError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if purged > 0 {
            info!(purged, "settled parcels purged");
        }
        Ok(purged)
    }

    fn deliver(
        &self,
        sender_id: Option<&str>,
        recipient_id: &str,
        payload_ref: &str,
    ) -> DeliveryResult<String> {
        if recipient_id.is_empty() || payload_ref.is_empty() {
            return Err(DeliveryError::InvalidArgument(
                "recipient and payload must not be empty".into(),
            ));
        }
        let now = self.clock.now_wall();
        let parcel = Parcel {
            parcel_id: Uuid::now_v7().to_string(),
            sender_id: sender_id.map(str::to_string),
            recipient_id: recipient_id.to_string(),
            payload_ref: payload_ref.to_string(),
            created_at: now,
            expires_at: now.saturating_add(self.config.retention()),
            claimed_at: None,
            state: ParcelState::Pending,
            revision: 0,
        };
        self.table.create(&parcel.parcel_id, parcel.to_fields())?;
        info!(
            parcel_id = %parcel.parcel_id,
            sender_id = sender_id.unwrap_or_default(),
            recipient_id,
            payload_ref,
            "parcel sent"
        );
        Ok(parcel.parcel_id)
    }

    /// Returns whether this call moved the parcel to `Expired`.
    fn expire(&self, parcel_id: &str, now: Timestamp) -> DeliveryResult<bool> {
        let mut budget = self.config.retry_policy().start(self.clock.as_ref());
        while budget.next_attempt() {
            let parcel = match self.parcel(parcel_id) {
                Ok(parcel) => parcel,
                Err(DeliveryError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e),
            };
            if parcel.state != ParcelState::Pending || now < parcel.expires_at {
                return Ok(false);
            }
            let mut next = parcel.clone();
            next.state = ParcelState::Expired;
            match self.table.replace(parcel_id, next.to_fields(), parcel.revision) {
                Ok(_) => {
                    debug!(parcel_id, recipient_id = %parcel.recipient_id, "parcel expired");
                    return Ok(true);
                }
                Err(TableError::Conflict { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        warn!(parcel_id, "parcel expiry contended, deferring");
        Err(DeliveryError::Contention {
            parcel_id: parcel_id.to_string(),
            attempts: budget.attempts(),
        })
    }
}

fn expired(parcel: &Parcel) -> DeliveryError {
    DeliveryError::Expired {
        parcel_id: parcel.parcel_id.clone(),
        expires_at: parcel.expires_at,
    }
}

impl std::fmt::Debug for DeliveryBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryBox")
            .field("table", &self.table)
            .field("config", &self.config)
            .finish()
    }
}
