//! Bounded retry for optimistic writes.
//!
//! A [`RetryPolicy`] caps both the number of attempts and the amount of
//! monotonic time a contended operation may spend. Domain code opens a
//! [`RetryBudget`] per operation and loops while it grants attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use darkstar_types::TimeProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Upper bound on attempts, the first one included.
    pub max_attempts: u32,
    /// No new attempt starts once this much monotonic time has passed.
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Start counting attempts for one operation.
    pub fn start<'a>(&self, clock: &'a dyn TimeProvider) -> RetryBudget<'a> {
        RetryBudget {
            policy: *self,
            clock,
            started: clock.now_monotonic(),
            attempts: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            deadline: Some(Duration::from_millis(250)),
        }
    }
}

/// Attempt counter for a single operation.
pub struct RetryBudget<'a> {
    policy: RetryPolicy,
    clock: &'a dyn TimeProvider,
    started: Duration,
    attempts: u32,
}

impl RetryBudget<'_> {
    /// Whether another attempt may start. The first call always succeeds
    /// when `max_attempts > 0`, whatever the deadline.
    pub fn next_attempt(&mut self) -> bool {
        if self.attempts >= self.policy.max_attempts {
            return false;
        }
        if self.attempts > 0 {
            if let Some(deadline) = self.policy.deadline {
                let elapsed = self.clock.now_monotonic().saturating_sub(self.started);
                if elapsed >= deadline {
                    return false;
                }
            }
        }
        self.attempts += 1;
        true
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl std::fmt::Debug for RetryBudget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryBudget")
            .field("policy", &self.policy)
            .field("attempts", &self.attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkstar_types::{ManualClock, Timestamp};

    #[test]
    fn attempts_are_capped() {
        let clock = ManualClock::new(Timestamp::zero());
        let mut budget = RetryPolicy::new(3).start(&clock);
        assert!(budget.next_attempt());
        assert!(budget.next_attempt());
        assert!(budget.next_attempt());
        assert!(!budget.next_attempt());
        assert_eq!(budget.attempts(), 3);
    }

    #[test]
    fn zero_attempts_grants_nothing() {
        let clock = ManualClock::new(Timestamp::zero());
        let mut budget = RetryPolicy::new(0).start(&clock);
        assert!(!budget.next_attempt());
    }

    #[test]
    fn deadline_stops_retries() {
        let clock = ManualClock::new(Timestamp::zero());
        let policy = RetryPolicy::new(100).with_deadline(Duration::from_millis(10));
        let mut budget = policy.start(&clock);
        assert!(budget.next_attempt());
        clock.advance(Duration::from_millis(5));
        assert!(budget.next_attempt());
        clock.advance(Duration::from_millis(5));
        assert!(!budget.next_attempt());
        assert_eq!(budget.attempts(), 2);
    }

    #[test]
    fn first_attempt_ignores_deadline() {
        let clock = ManualClock::new(Timestamp::zero());
        let policy = RetryPolicy::new(5).with_deadline(Duration::ZERO);
        let mut budget = policy.start(&clock);
        assert!(budget.next_attempt());
        assert!(!budget.next_attempt());
    }

    #[test]
    fn wall_clock_jump_does_not_expire_budget() {
        let clock = ManualClock::new(Timestamp::zero());
        let policy = RetryPolicy::new(5).with_deadline(Duration::from_millis(10));
        let mut budget = policy.start(&clock);
        assert!(budget.next_attempt());
        clock.set_wall(Timestamp::from_millis(1_000_000));
        assert!(budget.next_attempt());
    }
}
