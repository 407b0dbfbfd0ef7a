use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use darkstar_auction::AuctionHouse;
use darkstar_broker::Broker;
use darkstar_delivery::DeliveryBox;
use darkstar_escrow::{InMemoryLedger, Ledger};
use darkstar_store::{BackingStore, Database, InMemoryBackingStore, LogBackingStore};
use darkstar_types::{SystemClock, TimeProvider, Timestamp};

use crate::config::{DarkstarConfig, StorageBackend};
use crate::error::{SdkError, SdkResult};

/// Result of one [`Darkstar::sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub auction: darkstar_auction::SweepReport,
    pub delivery: darkstar_delivery::SweepReport,
    pub listings_purged: usize,
    pub parcels_purged: usize,
    pub tombstones_purged: usize,
    /// One entry per pass that failed; the other passes still ran.
    pub errors: Vec<String>,
}

impl MaintenanceReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record<T: Default, E: std::fmt::Display>(&mut self, pass: &str, result: Result<T, E>) -> T {
        result.unwrap_or_else(|e| {
            error!(pass, error = %e, "maintenance pass failed");
            self.errors.push(format!("{pass}: {e}"));
            T::default()
        })
    }
}

/// A fully wired darkstar instance.
pub struct Darkstar {
    config: DarkstarConfig,
    clock: Arc<dyn TimeProvider>,
    db: Arc<Database>,
    log: Option<Arc<LogBackingStore>>,
    ledger: Arc<dyn Ledger>,
    auction: AuctionHouse,
    delivery: DeliveryBox,
}

impl Darkstar {
    /// Open with the system clock and an in-memory ledger.
    pub fn open(config: DarkstarConfig) -> SdkResult<Self> {
        Self::with_parts(
            config,
            Arc::new(SystemClock::new()),
            Arc::new(InMemoryLedger::new()),
        )
    }

    /// Open with a caller-supplied clock and ledger. Storage still follows
    /// `config.storage`.
    pub fn with_parts(
        config: DarkstarConfig,
        clock: Arc<dyn TimeProvider>,
        ledger: Arc<dyn Ledger>,
    ) -> SdkResult<Self> {
        config.validate()?;

        let (backing, log) = match config.storage.backend {
            StorageBackend::Memory => (
                Arc::new(InMemoryBackingStore::new()) as Arc<dyn BackingStore>,
                None,
            ),
            StorageBackend::Log => {
                let path = config
                    .storage
                    .path
                    .as_deref()
                    .ok_or_else(|| SdkError::Config("log storage requires a path".into()))?;
                let store = Arc::new(LogBackingStore::open(
                    path,
                    darkstar_store::LogConfig {
                        sync_on_write: config.storage.sync_on_write,
                    },
                )?);
                (store.clone() as Arc<dyn BackingStore>, Some(store))
            }
        };

        let broker = Arc::new(Broker::new());
        let db = Arc::new(Database::new(backing, broker, Arc::clone(&clock)));
        let auction = AuctionHouse::new(
            Arc::clone(&db),
            Arc::clone(&ledger),
            Arc::clone(&clock),
            config.auction.clone(),
        )?;
        let delivery = DeliveryBox::new(Arc::clone(&db), Arc::clone(&clock), config.delivery.clone())?;

        info!(
            backend = ?config.storage.backend,
            tables = ?db.tables()?,
            "darkstar opened"
        );
        Ok(Self {
            config,
            clock,
            db,
            log,
            ledger,
            auction,
            delivery,
        })
    }

    pub fn config(&self) -> &DarkstarConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn broker(&self) -> &Arc<Broker> {
        self.db.broker()
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn auction(&self) -> &AuctionHouse {
        &self.auction
    }

    pub fn delivery(&self) -> &DeliveryBox {
        &self.delivery
    }

    /// Run every maintenance pass as of `now`: both expiry sweeps, both
    /// domain purges, and tombstone purging for every table.
    ///
    /// A failing pass does not stop the ones after it; its error lands in
    /// [`MaintenanceReport::errors`]. Each pass is idempotent and safe to
    /// run concurrently with itself.
    pub fn sweep(&self, now: Timestamp) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        report.auction = report.record("auction sweep", self.auction.sweep_expired(now));
        report.delivery = report.record("delivery sweep", self.delivery.sweep_expired(now));
        report.listings_purged = report.record("auction purge", self.auction.purge_settled(now));
        report.parcels_purged = report.record("delivery purge", self.delivery.purge(now));

        let retention = self.config.storage.tombstone_retention();
        let tables = report.record("table listing", self.db.tables());
        for table in tables {
            let pass = format!("tombstone purge of {table}");
            let purged = report.record(&pass, self.db.purge_tombstones(&table, now, retention));
            report.tombstones_purged += purged;
        }
        debug!(?report, "maintenance sweep finished");
        report
    }

    /// Rewrite the storage log down to live records. Returns the size of the
    /// compacted log in bytes, or `None` for in-memory storage.
    pub fn compact_storage(&self) -> SdkResult<Option<u64>> {
        match &self.log {
            Some(log) => Ok(Some(log.compact()?)),
            None => Ok(None),
        }
    }

    /// Close every change stream. Stored data is untouched.
    pub fn shutdown(&self) {
        self.db.broker().shutdown();
        info!("darkstar shut down");
    }
}

impl std::fmt::Debug for Darkstar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Darkstar")
            .field("backend", &self.config.storage.backend)
            .field("db", &self.db)
            .finish()
    }
}
