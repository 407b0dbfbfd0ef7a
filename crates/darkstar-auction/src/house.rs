//! The auction house table and its operations.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use darkstar_escrow::{HoldRef, Ledger};
use darkstar_store::Database;
use darkstar_table::{Table, TableError};
use darkstar_types::{DarkObject, TimeProvider, Timestamp, Value};

use crate::config::AuctionConfig;
use crate::error::{AuctionError, AuctionResult};
use crate::listing::{to_signed, Listing, ListingState};

pub const TABLE_NAME: &str = "auction_house";

/// Outcome counts from one [`AuctionHouse::sweep_expired`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired with a bid; escrow captured to the seller.
    pub sold: usize,
    /// Expired without a bid.
    pub expired: usize,
    /// Already settled by someone else by the time we got to it.
    pub skipped: usize,
    /// Retry budget ran out; the next sweep will pick it up.
    pub contended: usize,
    /// Storage or ledger faults, logged individually.
    pub failed: usize,
}

impl SweepReport {
    pub fn settled(&self) -> usize {
        self.sold + self.expired
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

enum Settlement {
    Sold,
    Expired,
    Skipped,
    Contended,
}

/// Auction listings with escrowed bidding.
pub struct AuctionHouse {
    table: Table,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn TimeProvider>,
    config: AuctionConfig,
}

impl AuctionHouse {
    /// Open the `auction_house` table on `db`, creating it if needed.
    pub fn new(
        db: Arc<Database>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn TimeProvider>,
        config: AuctionConfig,
    ) -> AuctionResult<Self> {
        let table = Table::open(db, Listing::schema()?)?;
        Ok(Self {
            table,
            ledger,
            clock,
            config,
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn config(&self) -> &AuctionConfig {
        &self.config
    }

    /// List `quantity` of `item_ref` for sale. `duration` falls back to the
    /// configured listing lifetime.
    pub fn create_listing(
        &self,
        seller_id: &str,
        item_ref: &str,
        quantity: u32,
        starting_price: u64,
        duration: Option<Duration>,
    ) -> AuctionResult<Listing> {
        if seller_id.is_empty() || item_ref.is_empty() {
            return Err(AuctionError::InvalidArgument(
                "seller and item must not be empty".into(),
            ));
        }
        if quantity == 0 {
            return Err(AuctionError::InvalidArgument("quantity must be at least 1".into()));
        }
        to_signed("starting_price", starting_price)?;

        let now = self.clock.now_wall();
        let lifetime = duration.unwrap_or_else(|| self.config.listing_duration());
        let listing = Listing {
            listing_id: Uuid::now_v7().to_string(),
            seller_id: seller_id.to_string(),
            item_ref: item_ref.to_string(),
            quantity,
            starting_price,
            current_bid: None,
            current_bidder_id: None,
            escrow_hold: None,
            created_at: now,
            expires_at: now.saturating_add(lifetime),
            settled_at: None,
            state: ListingState::Open,
            revision: 0,
        };
        let obj = self.table.create(&listing.listing_id, listing.to_fields()?)?;
        info!(
            listing_id = %listing.listing_id,
            seller_id,
            item_ref,
            quantity,
            starting_price,
            expires_at = %listing.expires_at,
            "listing created"
        );
        Listing::from_object(&obj)
    }

    pub fn listing(&self, listing_id: &str) -> AuctionResult<Listing> {
        Listing::from_object(&self.table.get(listing_id)?)
    }

    /// Open, unexpired listings for `item_ref`, oldest first.
    pub fn open_listings(&self, item_ref: &str) -> AuctionResult<Vec<Listing>> {
        let now = self.clock.now_wall();
        self.select(ListingState::Open, |l| {
            l.item_ref == item_ref && !l.is_expired_at(now)
        })
    }

    /// Sold listings for `item_ref`, ordered by settlement time.
    pub fn price_history(&self, item_ref: &str) -> AuctionResult<Vec<Listing>> {
        let mut sold = self.select(ListingState::Sold, |l| l.item_ref == item_ref)?;
        sold.sort_by_key(|l| l.settled_at);
        Ok(sold)
    }

    /// Bid `amount` on a listing with funds escrowed from `bidder_id`.
    ///
    /// The new hold is taken before the listing is written and the previous
    /// bidder's hold is released only after the write commits. A lost race
    /// releases the new hold and starts over from a fresh read.
    pub fn place_bid(&self, listing_id: &str, bidder_id: &str, amount: u64) -> AuctionResult<Listing> {
        if bidder_id.is_empty() {
            return Err(AuctionError::InvalidArgument("bidder must not be empty".into()));
        }
        to_signed("amount", amount)?;

        let mut budget = self.config.retry_policy().start(self.clock.as_ref());
        while budget.next_attempt() {
            let listing = self.listing(listing_id)?;
            check_bid(&listing, bidder_id, amount, self.clock.now_wall())?;

            let hold = self.ledger.hold(bidder_id, amount)?;
            let mut next = listing.clone();
            next.current_bid = Some(amount);
            next.current_bidder_id = Some(bidder_id.to_string());
            next.escrow_hold = Some(hold);

            let written = next
                .to_fields()
                .and_then(|fields| Ok(self.table.replace(listing_id, fields, listing.revision)?));
            match written {
                Ok(obj) => {
                    if let Some(previous) = listing.escrow_hold {
                        self.release_hold(previous, listing_id, "outbid");
                    }
                    info!(listing_id, bidder_id, amount, revision = obj.revision, "bid placed");
                    return Listing::from_object(&obj);
                }
                Err(AuctionError::Table(TableError::Conflict { actual, .. })) => {
                    self.release_hold(hold, listing_id, "bid lost race");
                    debug!(listing_id, bidder_id, attempt = budget.attempts(), ?actual, "bid conflict, retrying");
                }
                Err(e) => {
                    self.release_hold(hold, listing_id, "bid failed");
                    return Err(e);
                }
            }
        }

        warn!(listing_id, bidder_id, attempts = budget.attempts(), "bid abandoned under contention");
        Err(AuctionError::Contention {
            listing_id: listing_id.to_string(),
            attempts: budget.attempts(),
        })
    }

    /// Withdraw an open listing.
    ///
    /// The Cancelled state is committed before the escrowed bid, if any, is
    /// released, so a settlement racing the cancel either wins the write and
    /// captures the hold or loses it and finds the listing Cancelled. The
    /// returned listing keeps `escrow_hold` for reconciliation.
    pub fn cancel(&self, listing_id: &str, seller_id: &str) -> AuctionResult<Listing> {
        let mut budget = self.config.retry_policy().start(self.clock.as_ref());
        while budget.next_attempt() {
            let listing = self.listing(listing_id)?;
            if listing.seller_id != seller_id {
                return Err(AuctionError::NotSeller {
                    listing_id: listing_id.to_string(),
                    account: seller_id.to_string(),
                });
            }
            if listing.state != ListingState::Open {
                return Err(invalid_state(&listing));
            }
            let now = self.clock.now_wall();
            if listing.is_expired_at(now) {
                return Err(AuctionError::Expired {
                    listing_id: listing_id.to_string(),
                    expires_at: listing.expires_at,
                });
            }

            let mut next = listing.clone();
            next.state = ListingState::Cancelled;
            next.settled_at = Some(now);
            match self.table.replace(listing_id, next.to_fields()?, listing.revision) {
                Ok(obj) => {
                    if let Some(hold) = listing.escrow_hold {
                        self.release_hold(hold, listing_id, "cancelled");
                    }
                    info!(listing_id, seller_id, released = listing.escrow_hold.is_some(), "listing cancelled");
                    return Listing::from_object(&obj);
                }
                Err(TableError::Conflict { .. }) => {
                    debug!(listing_id, attempt = budget.attempts(), "cancel conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(listing_id, attempts = budget.attempts(), "cancel abandoned under contention");
        Err(AuctionError::Contention {
            listing_id: listing_id.to_string(),
            attempts: budget.attempts(),
        })
    }

    /// Settle every open listing with `expires_at <= now`.
    ///
    /// Safe to run concurrently with itself and with bidding: each listing
    /// moves out of `Open` through one compare-and-swap, and escrow is
    /// captured only by the sweep whose write won.
    pub fn sweep_expired(&self, now: Timestamp) -> AuctionResult<SweepReport> {
        let open = ListingState::Open.as_str();
        let scan = self.table.query(move |obj| {
            obj.get("state").and_then(Value::as_str) == Some(open)
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
                    error!(table = TABLE_NAME, error = %e, "unreadable listing during sweep");
                    report.failed += 1;
                }
            }
        }

        for listing_id in due {
            match self.settle(&listing_id, now) {
                Ok(Settlement::Sold) => report.sold += 1,
                Ok(Settlement::Expired) => report.expired += 1,
                Ok(Settlement::Skipped) => report.skipped += 1,
                Ok(Settlement::Contended) => {
                    warn!(listing_id = %listing_id, "settlement contended, deferring");
                    report.contended += 1;
                }
                Err(e) => {
                    error!(listing_id = %listing_id, error = %e, "settlement failed");
                    report.failed += 1;
                }
            }
        }

        if !report.is_empty() {
            info!(
                sold = report.sold,
                expired = report.expired,
                skipped = report.skipped,
                contended = report.contended,
                failed = report.failed,
                "auction sweep complete"
            );
        }
        Ok(report)
    }

    /// Physically remove settled listings older than the audit retention.
    /// Returns the number removed.
    ///
    /// Only the tombstones written by this pass are dropped.
    pub fn purge_settled(&self, now: Timestamp) -> AuctionResult<usize> {
        let retention = self.config.audit_retention();
        let scan = self.table.query(move |obj| {
            obj.get("settled_at")
                .and_then(Value::as_timestamp)
                .is_some_and(|at| at.saturating_add(retention) <= now)
        })?;

        let mut purged = 0;
        for item in scan {
            let obj = item.map_err(TableError::from)?;
            match self.table.delete_at(&obj.key, obj.revision) {
                Ok(tombstone) => {
                    self.table
                        .database()
                        .purge_tombstone(TABLE_NAME, &obj.key, tombstone.revision)
                        .map_err(TableError::from)?;
                    purged += 1;
                }
                Err(TableError::Conflict { .. } | TableError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if purged > 0 {
            info!(purged, "settled listings purged");
        }
        Ok(purged)
    }

    fn settle(&self, listing_id: &str, now: Timestamp) -> AuctionResult<Settlement> {
        let mut budget = self.config.retry_policy().start(self.clock.as_ref());
        while budget.next_attempt() {
            let listing = match self.listing(listing_id) {
                Ok(listing) => listing,
                Err(AuctionError::NotFound(_)) => return Ok(Settlement::Skipped),
                Err(e) => return Err(e),
            };
            if listing.state != ListingState::Open || !listing.is_expired_at(now) {
                return Ok(Settlement::Skipped);
            }

            let mut next = listing.clone();
            next.settled_at = Some(now);
            next.state = if listing.current_bid.is_some() {
                ListingState::Sold
            } else {
                ListingState::Expired
            };
            match self.table.replace(listing_id, next.to_fields()?, listing.revision) {
                Ok(obj) => return self.finish_settlement(&listing, &obj),
                Err(TableError::Conflict { .. }) => {
                    debug!(listing_id, attempt = budget.attempts(), "settlement conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Settlement::Contended)
    }

    fn finish_settlement(&self, before: &Listing, committed: &DarkObject) -> AuctionResult<Settlement> {
        let listing_id = before.listing_id.as_str();
        let Some(price) = before.current_bid else {
            debug!(listing_id, revision = committed.revision, "listing expired unsold");
            return Ok(Settlement::Expired);
        };
        match before.escrow_hold {
            Some(hold) => self.ledger.capture(hold, &before.seller_id)?,
            None => warn!(listing_id, "sold listing had no escrow hold"),
        }
        info!(
            listing_id,
            seller_id = %before.seller_id,
            buyer_id = before.current_bidder_id.as_deref().unwrap_or_default(),
            price,
            revision = committed.revision,
            "listing sold"
        );
        Ok(Settlement::Sold)
    }

    /// Decode every listing in `state` and keep those matching `keep`.
    fn select<F>(&self, state: ListingState, keep: F) -> AuctionResult<Vec<Listing>>
    where
        F: Fn(&Listing) -> bool,
    {
        let wanted = state.as_str();
        let scan = self
            .table
            .query(move |obj| obj.get("state").and_then(Value::as_str) == Some(wanted))?;
        let mut out = Vec::new();
        for item in scan {
            let listing = Listing::from_object(&item.map_err(TableError::from)?)?;
            if keep(&listing) {
                out.push(listing);
            }
        }
        Ok(out)
    }

    fn release_hold(&self, hold: HoldRef, listing_id: &str, reason: &str) {
        match self.ledger.release(hold) {
            Ok(()) => debug!(listing_id, %hold, reason, "escrow hold released"),
            Err(e) => error!(listing_id, %hold, reason, error = %e, "escrow hold release failed"),
        }
    }
}

fn check_bid(listing: &Listing, bidder_id: &str, amount: u64, now: Timestamp) -> AuctionResult<()> {
    if listing.state != ListingState::Open {
        return Err(invalid_state(listing));
    }
    if listing.is_expired_at(now) {
        return Err(AuctionError::Expired {
            listing_id: listing.listing_id.clone(),
            expires_at: listing.expires_at,
        });
    }
    if listing.seller_id == bidder_id {
        return Err(AuctionError::SellerCannotBid(listing.listing_id.clone()));
    }
    if amount <= listing.minimum_bid() {
        return Err(AuctionError::BidTooLow {
            listing_id: listing.listing_id.clone(),
            amount,
            minimum: listing.minimum_bid(),
        });
    }
    Ok(())
}

fn invalid_state(listing: &Listing) -> AuctionError {
    AuctionError::InvalidState {
        listing_id: listing.listing_id.clone(),
        state: listing.state,
    }
}

impl std::fmt::Debug for AuctionHouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuctionHouse")
            .field("table", &self.table)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Barrier, Mutex, OnceLock};
    use std::thread;

    use super::*;
    use darkstar_broker::{ChangeKind, KeyPattern};
    use darkstar_escrow::{EscrowResult, HoldState, InMemoryLedger};
    use darkstar_types::ManualClock;

    const HOUR: Duration = Duration::from_secs(3600);

    struct Fixture {
        clock: Arc<ManualClock>,
        ledger: Arc<InMemoryLedger>,
        house: Arc<AuctionHouse>,
    }

    fn fixture() -> Fixture {
        fixture_with(AuctionConfig::default())
    }

    fn fixture_with(config: AuctionConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000_000)));
        let db = Arc::new(Database::in_memory(clock.clone()));
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.open_account("seller", 0).unwrap();
        for bidder in ["alice", "bob", "carol", "dave"] {
            ledger.open_account(bidder, 100).unwrap();
        }
        let house = AuctionHouse::new(db, ledger.clone(), clock.clone(), config).unwrap();
        Fixture {
            clock,
            ledger,
            house: Arc::new(house),
        }
    }

    fn list(f: &Fixture) -> Listing {
        f.house
            .create_listing("seller", "4096", 1, 10, Some(HOUR))
            .unwrap()
    }

    // ---- listings ----

    #[test]
    fn create_listing_starts_open() {
        let f = fixture();
        let listing = list(&f);
        assert_eq!(listing.state, ListingState::Open);
        assert_eq!(listing.revision, 1);
        assert_eq!(listing.current_bid, None);
        assert_eq!(listing.expires_at, listing.created_at.saturating_add(HOUR));
        assert_eq!(f.house.listing(&listing.listing_id).unwrap(), listing);
    }

    #[test]
    fn create_listing_uses_configured_duration() {
        let f = fixture();
        let listing = f.house.create_listing("seller", "4096", 12, 10, None).unwrap();
        assert_eq!(
            listing.expires_at,
            listing.created_at.saturating_add(f.house.config().listing_duration())
        );
        assert_eq!(listing.quantity, 12);
    }

    #[test]
    fn create_listing_rejects_bad_arguments() {
        let f = fixture();
        assert!(matches!(
            f.house.create_listing("seller", "4096", 0, 10, None),
            Err(AuctionError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.house.create_listing("", "4096", 1, 10, None),
            Err(AuctionError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.house.create_listing("seller", "4096", 1, u64::MAX, None),
            Err(AuctionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_listing_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.house.listing("missing"),
            Err(AuctionError::NotFound(_))
        ));
        assert!(matches!(
            f.house.place_bid("missing", "alice", 20),
            Err(AuctionError::NotFound(_))
        ));
    }

    // ---- bidding ----

    #[test]
    fn lower_bid_is_rejected() {
        let f = fixture();
        let id = list(&f).listing_id;
        f.house.place_bid(&id, "alice", 50).unwrap();

        let err = f.house.place_bid(&id, "bob", 40).unwrap_err();
        assert!(matches!(err, AuctionError::BidTooLow { minimum: 50, .. }));
        assert_eq!(f.house.listing(&id).unwrap().current_bid, Some(50));
        assert_eq!(f.ledger.balance("bob").unwrap(), 100);
    }

    #[test]
    fn bid_must_exceed_starting_price() {
        let f = fixture();
        let id = list(&f).listing_id;
        assert!(matches!(
            f.house.place_bid(&id, "alice", 10),
            Err(AuctionError::BidTooLow { minimum: 10, .. })
        ));
        f.house.place_bid(&id, "alice", 11).unwrap();
    }

    #[test]
    fn outbid_releases_previous_hold() {
        let f = fixture();
        let id = list(&f).listing_id;
        let first = f.house.place_bid(&id, "alice", 50).unwrap();
        let alice_hold = first.escrow_hold.unwrap();
        assert_eq!(f.ledger.held("alice").unwrap(), 50);

        let second = f.house.place_bid(&id, "bob", 60).unwrap();
        assert_eq!(second.current_bidder_id.as_deref(), Some("bob"));
        assert_eq!(second.revision, 3);
        assert_eq!(f.ledger.balance("alice").unwrap(), 100);
        assert_eq!(f.ledger.held("alice").unwrap(), 0);
        assert_eq!(f.ledger.held("bob").unwrap(), 60);
        assert_eq!(f.ledger.hold_state(alice_hold).unwrap(), HoldState::Released);
        assert_eq!(f.ledger.active_holds(), 1);
    }

    #[test]
    fn seller_cannot_bid() {
        let f = fixture();
        let id = list(&f).listing_id;
        assert!(matches!(
            f.house.place_bid(&id, "seller", 20),
            Err(AuctionError::SellerCannotBid(_))
        ));
    }

    #[test]
    fn insufficient_funds_leaves_listing_untouched() {
        let f = fixture();
        let id = list(&f).listing_id;
        let err = f.house.place_bid(&id, "alice", 150).unwrap_err();
        assert!(matches!(err, AuctionError::InsufficientFunds { requested: 150, .. }));
        let listing = f.house.listing(&id).unwrap();
        assert_eq!(listing.revision, 1);
        assert_eq!(listing.current_bid, None);
        assert_eq!(f.ledger.active_holds(), 0);
    }

    #[test]
    fn bid_after_expiry_fails() {
        let f = fixture();
        let id = list(&f).listing_id;
        f.clock.advance(HOUR);
        assert!(matches!(
            f.house.place_bid(&id, "alice", 20),
            Err(AuctionError::Expired { .. })
        ));
        assert_eq!(f.ledger.active_holds(), 0);
    }

    #[test]
    fn bid_on_cancelled_listing_is_invalid_state() {
        let f = fixture();
        let id = list(&f).listing_id;
        f.house.cancel(&id, "seller").unwrap();
        assert!(matches!(
            f.house.place_bid(&id, "alice", 20),
            Err(AuctionError::InvalidState {
                state: ListingState::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn concurrent_bids_leave_one_hold() {
        let config = AuctionConfig {
            max_bid_attempts: 64,
            ..AuctionConfig::default()
        };
        let f = fixture_with(config);
        let id = list(&f).listing_id;
        let bidders = [("alice", 20), ("bob", 30), ("carol", 40), ("dave", 50)];
        let barrier = Arc::new(Barrier::new(bidders.len()));

        let handles: Vec<_> = bidders
            .into_iter()
            .map(|(bidder, amount)| {
                let house = Arc::clone(&f.house);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    house.place_bid(&id, bidder, amount)
                })
            })
            .collect();
        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) | Err(AuctionError::BidTooLow { .. }) => {}
                Err(e) => panic!("unexpected bid error: {e}"),
            }
        }

        let listing = f.house.listing(&id).unwrap();
        let winner = listing.current_bidder_id.clone().unwrap();
        assert_eq!(f.ledger.active_holds(), 1);
        assert_eq!(
            f.ledger.held(&winner).unwrap(),
            listing.current_bid.unwrap()
        );
    }

    // ---- sweep ----

    #[test]
    fn sweep_sells_and_captures() {
        let f = fixture();
        let id = list(&f).listing_id;
        f.house.place_bid(&id, "alice", 75).unwrap();
        f.clock.advance(HOUR);

        let report = f.house.sweep_expired(f.clock.now_wall()).unwrap();
        assert_eq!(report.sold, 1);
        assert_eq!(report.settled(), 1);

        let listing = f.house.listing(&id).unwrap();
        assert_eq!(listing.state, ListingState::Sold);
        assert_eq!(listing.settled_at, Some(f.clock.now_wall()));
        assert_eq!(f.ledger.balance("seller").unwrap(), 75);
        assert_eq!(f.ledger.balance("alice").unwrap(), 25);
        assert_eq!(f.ledger.held("alice").unwrap(), 0);

        let again = f.house.sweep_expired(f.clock.now_wall()).unwrap();
        assert!(again.is_empty());
        assert_eq!(f.ledger.balance("seller").unwrap(), 75);
    }

    #[test]
    fn concurrent_sweeps_capture_once() {
        let f = fixture();
        let id = list(&f).listing_id;
        f.house.place_bid(&id, "alice", 75).unwrap();
        f.clock.advance(HOUR);
        let now = f.clock.now_wall();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let house = Arc::clone(&f.house);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    house.sweep_expired(now).unwrap()
                })
            })
            .collect();
        let reports: Vec<SweepReport> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(reports.iter().map(|r| r.sold).sum::<usize>(), 1);
        assert_eq!(reports.iter().map(|r| r.failed).sum::<usize>(), 0);
        assert_eq!(f.house.listing(&id).unwrap().state, ListingState::Sold);
        assert_eq!(f.ledger.balance("seller").unwrap(), 75);
        assert_eq!(f.ledger.balance("alice").unwrap(), 25);
    }

    #[test]
    fn bids_racing_the_expiry_sweep_settle_once() {
        let config = AuctionConfig {
            max_bid_attempts: 64,
            ..AuctionConfig::default()
        };
        let f = fixture_with(config);
        let id = list(&f).listing_id;
        f.clock.advance(HOUR - Duration::from_millis(1));

        let bidders = [("alice", 20), ("bob", 30), ("carol", 40), ("dave", 50)];
        let barrier = Arc::new(Barrier::new(bidders.len() + 1));
        let bids: Vec<_> = bidders
            .into_iter()
            .map(|(bidder, amount)| {
                let house = Arc::clone(&f.house);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    house.place_bid(&id, bidder, amount)
                })
            })
            .collect();
        let sweeper = {
            let house = Arc::clone(&f.house);
            let clock = Arc::clone(&f.clock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                clock.advance(Duration::from_millis(1));
                house.sweep_expired(clock.now_wall()).unwrap()
            })
        };

        for handle in bids {
            match handle.join().unwrap() {
                Ok(_)
                | Err(AuctionError::BidTooLow { .. })
                | Err(AuctionError::Expired { .. })
                | Err(AuctionError::InvalidState { .. })
                | Err(AuctionError::Contention { .. }) => {}
                Err(e) => panic!("unexpected bid error: {e}"),
            }
        }
        let first = sweeper.join().unwrap();
        let second = f.house.sweep_expired(f.clock.now_wall()).unwrap();
        assert_eq!(first.settled() + second.settled(), 1);
        assert_eq!(first.failed + second.failed, 0);

        let listing = f.house.listing(&id).unwrap();
        assert_eq!(f.ledger.active_holds(), 0);
        match listing.state {
            ListingState::Sold => {
                let winner = listing.current_bidder_id.clone().unwrap();
                let price = listing.current_bid.unwrap();
                assert_eq!(f.ledger.balance("seller").unwrap(), price);
                for (bidder, _) in bidders {
                    let expected = if bidder == winner { 100 - price } else { 100 };
                    assert_eq!(f.ledger.balance(bidder).unwrap(), expected, "{bidder}");
                    assert_eq!(f.ledger.held(bidder).unwrap(), 0);
                }
            }
            ListingState::Expired => {
                assert_eq!(listing.current_bid, None);
                assert_eq!(f.ledger.balance("seller").unwrap(), 0);
                for (bidder, _) in bidders {
                    assert_eq!(f.ledger.balance(bidder).unwrap(), 100);
                }
            }
            other => panic!("listing left in {other:?}"),
        }
    }

    #[test]
    fn sweep_expires_unsold_listing() {
        let f = fixture();
        let id = list(&f).listing_id;
        f.clock.advance(HOUR);
        let report = f.house.sweep_expired(f.clock.now_wall()).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(f.house.listing(&id).unwrap().state, ListingState::Expired);
        assert_eq!(f.ledger.balance("seller").unwrap(), 0);
    }

    #[test]
    fn sweep_ignores_live_listings() {
        let f = fixture();
        let id = list(&f).listing_id;
        f.clock.advance(HOUR / 2);
        let report = f.house.sweep_expired(f.clock.now_wall()).unwrap();
        assert!(report.is_empty());
        assert_eq!(f.house.listing(&id).unwrap().state, ListingState::Open);
    }

    #[test]
    fn capture_failure_is_reported() {
        let f = fixture();
        let listing = f
            .house
            .create_listing("ghost", "4096", 1, 10, Some(HOUR))
            .unwrap();
        f.house.place_bid(&listing.listing_id, "alice", 20).unwrap();
        f.clock.advance(HOUR);
        let report = f.house.sweep_expired(f.clock.now_wall()).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(
            f.house.listing(&listing.listing_id).unwrap().state,
            ListingState::Sold
        );
    }

    // ---- cancel ----

    #[test]
    fn cancel_releases_escrow() {
        let f = fixture();
        let id = list(&f).listing_id;
        f.house.place_bid(&id, "alice", 50).unwrap();

        let cancelled = f.house.cancel(&id, "seller").unwrap();
        assert_eq!(cancelled.state, ListingState::Cancelled);
        let hold = cancelled.escrow_hold.unwrap();
        assert_eq!(f.ledger.hold_state(hold).unwrap(), HoldState::Released);
        assert_eq!(f.ledger.balance("alice").unwrap(), 100);
        assert_eq!(f.ledger.active_holds(), 0);

        assert!(matches!(
            f.house.cancel(&id, "seller"),
            Err(AuctionError::InvalidState { .. })
        ));
    }

    /// Runs an expiry sweep from a second house on the same table every time
    /// a hold is released, as if a settlement landed at that instant.
    struct SweepOnRelease {
        inner: Arc<InMemoryLedger>,
        rival: OnceLock<AuctionHouse>,
        sweeps: Mutex<Vec<SweepReport>>,
    }

    impl Ledger for SweepOnRelease {
        fn hold(&self, account: &str, amount: u64) -> EscrowResult<HoldRef> {
            self.inner.hold(account, amount)
        }

        fn release(&self, hold: HoldRef) -> EscrowResult<()> {
            let result = self.inner.release(hold);
            if let Some(rival) = self.rival.get() {
                let report = rival
                    .sweep_expired(Timestamp::from_millis(u64::MAX / 2))
                    .unwrap();
                self.sweeps.lock().unwrap().push(report);
            }
            result
        }

        fn capture(&self, hold: HoldRef, to_account: &str) -> EscrowResult<()> {
            self.inner.capture(hold, to_account)
        }

        fn balance(&self, account: &str) -> EscrowResult<u64> {
            self.inner.balance(account)
        }

        fn hold_state(&self, hold: HoldRef) -> EscrowResult<HoldState> {
            self.inner.hold_state(hold)
        }
    }

    #[test]
    fn settlement_during_cancel_release_finds_listing_cancelled() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000_000)));
        let db = Arc::new(Database::in_memory(clock.clone()));
        let inner = Arc::new(InMemoryLedger::new());
        inner.open_account("seller", 0).unwrap();
        inner.open_account("alice", 100).unwrap();
        let ledger = Arc::new(SweepOnRelease {
            inner: inner.clone(),
            rival: OnceLock::new(),
            sweeps: Mutex::new(Vec::new()),
        });
        let house = AuctionHouse::new(
            db.clone(),
            ledger.clone(),
            clock.clone(),
            AuctionConfig::default(),
        )
        .unwrap();
        let rival = AuctionHouse::new(db, inner.clone(), clock, AuctionConfig::default()).unwrap();
        assert!(ledger.rival.set(rival).is_ok());

        let listing = house
            .create_listing("seller", "4096", 1, 10, Some(HOUR))
            .unwrap();
        house.place_bid(&listing.listing_id, "alice", 40).unwrap();

        let cancelled = house.cancel(&listing.listing_id, "seller").unwrap();
        assert_eq!(cancelled.state, ListingState::Cancelled);
        assert_eq!(
            house.listing(&listing.listing_id).unwrap().state,
            ListingState::Cancelled
        );

        // The settlement that ran inside the release saw nothing to settle.
        let sweeps = ledger.sweeps.lock().unwrap();
        assert_eq!(sweeps.len(), 1);
        assert!(sweeps[0].is_empty());
        assert_eq!(inner.balance("alice").unwrap(), 100);
        assert_eq!(inner.balance("seller").unwrap(), 0);
        assert_eq!(inner.active_holds(), 0);
    }

    #[test]
    fn only_seller_may_cancel() {
        let f = fixture();
        let id = list(&f).listing_id;
        assert!(matches!(
            f.house.cancel(&id, "alice"),
            Err(AuctionError::NotSeller { .. })
        ));
        assert_eq!(f.house.listing(&id).unwrap().state, ListingState::Open);
    }

    #[test]
    fn cancel_after_expiry_fails() {
        let f = fixture();
        let id = list(&f).listing_id;
        f.clock.advance(HOUR);
        assert!(matches!(
            f.house.cancel(&id, "seller"),
            Err(AuctionError::Expired { .. })
        ));
    }

    // ---- views ----

    #[test]
    fn open_listings_filter_by_item_and_expiry() {
        let f = fixture();
        let short = f
            .house
            .create_listing("seller", "4096", 1, 10, Some(Duration::from_secs(60)))
            .unwrap();
        let long = list(&f);
        f.house.create_listing("seller", "17", 1, 10, Some(HOUR)).unwrap();

        let ids: Vec<String> = f
            .house
            .open_listings("4096")
            .unwrap()
            .into_iter()
            .map(|l| l.listing_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&short.listing_id));

        f.clock.advance(Duration::from_secs(61));
        let ids: Vec<String> = f
            .house
            .open_listings("4096")
            .unwrap()
            .into_iter()
            .map(|l| l.listing_id)
            .collect();
        assert_eq!(ids, vec![long.listing_id]);
    }

    #[test]
    fn price_history_orders_by_settlement() {
        let f = fixture();
        let early = f
            .house
            .create_listing("seller", "4096", 1, 10, Some(Duration::from_secs(60)))
            .unwrap();
        let late = list(&f);
        f.house.place_bid(&early.listing_id, "alice", 30).unwrap();
        f.house.place_bid(&late.listing_id, "bob", 40).unwrap();

        f.clock.advance(Duration::from_secs(60));
        f.house.sweep_expired(f.clock.now_wall()).unwrap();
        f.clock.advance(HOUR);
        f.house.sweep_expired(f.clock.now_wall()).unwrap();

        let prices: Vec<Option<u64>> = f
            .house
            .price_history("4096")
            .unwrap()
            .into_iter()
            .map(|l| l.current_bid)
            .collect();
        assert_eq!(prices, vec![Some(30), Some(40)]);
        assert!(f.house.price_history("17").unwrap().is_empty());
    }

    #[test]
    fn purge_settled_respects_retention() {
        let f = fixture();
        let id = list(&f).listing_id;
        let live = f
            .house
            .create_listing("seller", "4096", 1, 10, Some(HOUR * 24 * 60))
            .unwrap();
        f.clock.advance(HOUR);
        f.house.sweep_expired(f.clock.now_wall()).unwrap();

        assert_eq!(f.house.purge_settled(f.clock.now_wall()).unwrap(), 0);

        f.clock.advance(f.house.config().audit_retention());
        assert_eq!(f.house.purge_settled(f.clock.now_wall()).unwrap(), 1);
        assert!(matches!(f.house.listing(&id), Err(AuctionError::NotFound(_))));
        assert!(f
            .house
            .table()
            .database()
            .get_including_tombstone(TABLE_NAME, &id)
            .unwrap()
            .is_none());
        assert!(f.house.listing(&live.listing_id).is_ok());
    }

    #[test]
    fn bids_are_announced_in_commit_order() {
        let f = fixture();
        let id = list(&f).listing_id;
        let mut sub = f
            .house
            .table()
            .subscribe(KeyPattern::Exact(id.clone()))
            .unwrap();
        f.house.place_bid(&id, "alice", 20).unwrap();
        f.house.place_bid(&id, "bob", 30).unwrap();

        let events = sub.drain();
        let revisions: Vec<u64> = events.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![2, 3]);
        assert!(events.iter().all(|e| e.kind == ChangeKind::Update));
        assert_eq!(
            events[1].fields_after.get("current_bid"),
            Some(&Value::Integer(30))
        );
    }
}
