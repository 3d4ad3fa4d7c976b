// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event Data Control (C2): lock-free allocation, publication and
//! reference-counted reading over a fixed array of [`SlotWord`]s.
//!
//! Grounded on `transport::shm::ring`'s push/try_pop CAS-retry discipline
//! and `core::rt::slabpool::Pool::try_reserve`'s scan-for-free-slot loop,
//! generalized from a single free-list bit per slot to the
//! timestamp/refcount pair `SlotWord` packs.
//!
//! Every public method here that mutates shared state restarts its CAS
//! loop from scratch on contention rather than retrying in place, the
//! same way `ShmRingWriter::push` re-reads `tail` after a failed
//! `compare_exchange` instead of assuming nothing else changed.

use crate::error::{LolaError, Result};
use crate::slot_word::{RefCount, SlotWord, Timestamp, R_MAX, T_INVALID, T_IN_WRITING, T_MAX};
use crate::transaction_log::TransactionLogSet;
use crate::SlotIndex;

/// One event's publication slots plus the transaction log set tracking
/// outstanding subscriber references into them (spec §4.2: "Holds... a
/// reference to the Transaction Log Set for that event").
pub struct EventDataControl<'a> {
    slots: &'a [SlotWord],
    tls: &'a TransactionLogSet,
}

impl<'a> EventDataControl<'a> {
    #[must_use]
    pub fn new(slots: &'a [SlotWord], tls: &'a TransactionLogSet) -> Self {
        Self { slots, tls }
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The timestamp currently stored in `slot`'s state word, used by
    /// callers (e.g. `facade::ProxyEvent`) to advance their own
    /// high-watermark after consuming a reference.
    #[must_use]
    pub fn slot_timestamp(&self, slot: SlotIndex) -> Timestamp {
        self.slots[slot as usize].timestamp()
    }

    /// Claim a free slot for the publisher to write into (spec §4.2.1).
    ///
    /// A slot is free iff `R == 0` (not referenced by any subscriber and
    /// not already claimed by a concurrent writer — `R == R_MAX` for an
    /// in-writing slot never matches `R == 0`). Among free slots, picks
    /// the one with the oldest (smallest) timestamp, tie-broken by lowest
    /// index, so the longest-idle slot is reused first. Returns
    /// `LolaError::SlotExhaustion` if every slot is currently referenced.
    pub fn allocate_next_slot(&self) -> Result<SlotIndex> {
        loop {
            let mut best: Option<(SlotIndex, Timestamp, RefCount)> = None;
            for (i, slot) in self.slots.iter().enumerate() {
                let (t, r) = slot.load_acquire();
                if r != 0 {
                    continue;
                }
                let is_better = match best {
                    None => true,
                    Some((_, best_t, _)) => t < best_t,
                };
                if is_better {
                    best = Some((i as SlotIndex, t, r));
                }
            }
            let Some((idx, t, r)) = best else {
                return Err(LolaError::SlotExhaustion);
            };
            if self.slots[idx as usize].cas((t, r), (T_IN_WRITING, R_MAX)) {
                return Ok(idx);
            }
            // Another writer (or a new reference) changed this slot
            // between our scan and the CAS; rescan from scratch.
        }
    }

    /// Publish a claimed slot with `timestamp`, making it visible to
    /// subscribers (spec §4.2.1). `timestamp` must not be `T_INVALID` or
    /// `T_IN_WRITING`; callers obtain it from their own monotone counter
    /// (see `facade::SkeletonEvent`), not from this module, which owns no
    /// publisher-side sequencing state of its own.
    pub fn event_ready(&self, slot: SlotIndex, timestamp: Timestamp) {
        debug_assert!(timestamp != T_INVALID && timestamp != T_IN_WRITING);
        self.slots[slot as usize].store_release(timestamp, 0);
    }

    /// Abandon a claimed slot without publishing, returning it to Invalid
    /// (spec §4.2.1, used when the producer's payload write itself fails).
    pub fn discard(&self, slot: SlotIndex) {
        self.slots[slot as usize].store_release(T_INVALID, 0);
    }

    /// Count Ready slots with a timestamp strictly newer than
    /// `reference_ts` (spec §4.2.3 `GetNumNewSamplesAvailable`).
    #[must_use]
    pub fn get_num_new_events(&self, reference_ts: Timestamp) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                let (t, r) = slot.load_acquire();
                t != T_INVALID && t != T_IN_WRITING && r < R_MAX && t > reference_ts
            })
            .count()
    }

    /// Take a reference on the oldest unseen Ready slot with
    /// `last_seen_ts < T <= upper_limit_ts` (spec §4.2.4), so a proxy
    /// polling repeatedly observes events in publication order. Returns
    /// `Ok(None)` if no qualifying slot exists. Records the reference in
    /// `proxy_idx`'s
    /// transaction log around the refcount CAS, in the mandated order
    /// `begin; fence; mutate; fence; commit` (spec §4.3), so a crash
    /// between `begin` and `commit` is visible to the Collector as
    /// dangling.
    pub fn reference_next_event(
        &self,
        proxy_idx: usize,
        last_seen_ts: Timestamp,
        upper_limit_ts: Timestamp,
    ) -> Result<Option<SlotIndex>> {
        let upper_limit_ts = if upper_limit_ts == T_INVALID {
            T_MAX
        } else {
            upper_limit_ts
        };
        loop {
            let mut best: Option<(SlotIndex, Timestamp, RefCount)> = None;
            for (i, slot) in self.slots.iter().enumerate() {
                let (t, r) = slot.load_acquire();
                if t == T_INVALID || t == T_IN_WRITING {
                    continue;
                }
                if r.saturating_add(1) >= R_MAX {
                    continue; // would collide with the in-writing sentinel
                }
                if !(t > last_seen_ts && t <= upper_limit_ts) {
                    continue;
                }
                let is_better = match best {
                    None => true,
                    Some((_, best_t, _)) => t < best_t,
                };
                if is_better {
                    best = Some((i as SlotIndex, t, r));
                }
            }
            let Some((idx, t, r)) = best else {
                return Ok(None);
            };

            self.tls.mark_reference_begin(proxy_idx, idx)?;
            if self.slots[idx as usize].cas((t, r), (t, r + 1)) {
                self.tls.mark_reference_commit(proxy_idx, idx)?;
                return Ok(Some(idx));
            }
            // Lost the race (another reader referenced it, or the
            // publisher recycled it first); our begin marker never had a
            // matching mutation, so undo it before rescanning.
            self.tls.abort_reference_begin(proxy_idx, idx)?;
        }
    }

    /// Release a previously taken reference on `slot` (spec §4.2.5),
    /// clearing the transaction log markers in the mandated order
    /// `commit := false; fence; mutate; fence; begin := false`.
    pub fn dereference(&self, proxy_idx: usize, slot: SlotIndex) -> Result<()> {
        self.tls.clear_reference_commit(proxy_idx, slot)?;
        let cur = self.slots[slot as usize].load_acquire();
        debug_assert!(cur.1 > 0, "dereferencing a slot with refcount 0");
        self.decrement_refcount(slot);
        self.tls.clear_reference_begin(proxy_idx, slot)?;
        Ok(())
    }

    /// Raw access to this event's slot array, for the `test_support`
    /// Attorney seam only (original: `EventDataControlAttorney`'s direct
    /// field access).
    #[cfg(test)]
    pub(crate) fn slots_for_test(&self) -> &'a [SlotWord] {
        self.slots
    }

    /// Decrement a slot's refcount via CAS retry, used both by
    /// `dereference` and by the Collector rolling back a crashed proxy's
    /// dangling references.
    pub(crate) fn decrement_refcount(&self, slot: SlotIndex) {
        let word = &self.slots[slot as usize];
        loop {
            let (t, r) = word.load_acquire();
            debug_assert!(r > 0, "refcount underflow on slot {slot}");
            if word.cas((t, r), (t, r - 1)) {
                return;
            }
        }
    }
}
