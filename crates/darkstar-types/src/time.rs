use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock timestamp in milliseconds since the UNIX epoch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// The UNIX epoch.
    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// `self + duration`, clamped at the maximum representable timestamp.
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(ms))
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of time for everything inside darkstar.
///
/// Nothing in the core reads the system clock directly; expiry logic takes
/// its notion of "now" from an injected provider so tests stay deterministic.
pub trait TimeProvider: Send + Sync {
    /// Monotonic time, for measuring durations and timeouts.
    fn now_monotonic(&self) -> Duration;

    /// Wall-clock time, for record timestamps and expiry deadlines.
    fn now_wall(&self) -> Timestamp;
}

/// Time provider backed by the operating system clocks.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for SystemClock {
    fn now_monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn now_wall(&self) -> Timestamp {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Timestamp(u64::try_from(ms).unwrap_or(u64::MAX))
    }
}

/// Manually driven clock for tests and simulations.
///
/// Wall and monotonic time advance together; the wall clock can also be
/// set directly, which does not move the monotonic clock backwards.
#[derive(Debug, Default)]
pub struct ManualClock {
    wall_ms: AtomicU64,
    monotonic_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start` on the wall clock.
    pub fn new(start: Timestamp) -> Self {
        Self {
            wall_ms: AtomicU64::new(start.as_millis()),
            monotonic_ms: AtomicU64::new(0),
        }
    }

    /// Move both clocks forward by `by`.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.wall_ms.fetch_add(ms, Ordering::SeqCst);
        self.monotonic_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump the wall clock to `to`.
    pub fn set_wall(&self, to: Timestamp) {
        self.wall_ms.store(to.as_millis(), Ordering::SeqCst);
    }
}

impl TimeProvider for ManualClock {
    fn now_monotonic(&self) -> Duration {
        Duration::from_millis(self.monotonic_ms.load(Ordering::SeqCst))
    }

    fn now_wall(&self) -> Timestamp {
        Timestamp(self.wall_ms.load(Ordering::SeqCst))
    }
}
