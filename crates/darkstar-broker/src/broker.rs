use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{BrokerError, Result};
use crate::event::ChangeEvent;
use crate::pattern::KeyPattern;

/// Identifier of a live subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Receiving end of a subscription.
///
/// Events arrive in commit order per key. The stream ends (`recv` returns
/// `None`) once the subscription is removed, the broker is cleared, or the
/// broker shuts down.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    table: String,
    pattern: KeyPattern,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pattern(&self) -> &KeyPattern {
        &self.pattern
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Take the next already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }

    /// Take every already-delivered event without waiting.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Internal subscriber: a table + key filter paired with a channel sender.
struct Subscriber {
    table: String,
    pattern: KeyPattern,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl Subscriber {
    fn matches(&self, event: &ChangeEvent) -> bool {
        self.table == event.table && self.pattern.matches(&event.key)
    }
}

/// In-process publish/subscribe bus for committed record changes.
///
/// The broker is an explicitly constructed component: create one per
/// database, share it behind an `Arc`, and drop or [`shutdown`](Self::shutdown)
/// it at teardown.
pub struct Broker {
    subscribers: RwLock<BTreeMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    shut_down: AtomicBool,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Subscribe to changes in `table` whose keys match `pattern`.
    pub fn subscribe(&self, table: &str, pattern: KeyPattern) -> Result<Subscription> {
        if table.is_empty() {
            return Err(BrokerError::EmptyTable);
        }
        if self.is_shut_down() {
            return Err(BrokerError::Shutdown);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Subscriber {
                    table: table.to_string(),
                    pattern: pattern.clone(),
                    sender: tx,
                },
            );

        debug!(%id, table, %pattern, "subscribed");
        Ok(Subscription {
            id,
            table: table.to_string(),
            pattern,
            receiver: rx,
        })
    }

    /// Release a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!(%id, "unsubscribed");
        }
        removed
    }

    /// Deliver a committed change to every matching subscriber.
    ///
    /// Called by database commit paths only, after the write is durable and
    /// while the committing key is still locked, so per-key delivery order
    /// equals commit order. Returns the number of subscribers reached.
    /// Publishing never fails: with no subscribers the event is dropped.
    pub fn publish(&self, mut event: ChangeEvent) -> usize {
        if self.is_shut_down() {
            debug!(table = %event.table, key = %event.key, "broker shut down; event dropped");
            return 0;
        }

        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        event.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        subs.retain(|_, sub| {
            if sub.matches(&event) {
                // A failed send means the receiver was dropped: prune it.
                let ok = sub.sender.send(event.clone()).is_ok();
                if ok {
                    delivered += 1;
                }
                ok
            } else {
                !sub.sender.is_closed()
            }
        });

        debug!(
            seq = event.seq,
            table = %event.table,
            key = %event.key,
            kind = %event.kind,
            revision = event.revision,
            delivered,
            "event published"
        );
        delivered
    }

    /// Drop every subscriber. Their streams end; the broker stays usable.
    pub fn clear(&self) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let count = subs.len();
        subs.clear();
        info!(count, "broker cleared");
    }

    /// Stop accepting subscribers and drop all existing ones.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.clear();
        info!("broker shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Number of registered subscribers (closed ones linger until the next
    /// publish prunes them).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("subscriber_count", &self.subscriber_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
