// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slot Collector (C5): reclaims references left dangling by a
//! subscriber that crashed mid-`reference_next_event`/`dereference`.
//!
//! Grounded on `transport::shm::segment::{is_segment_stale,
//! cleanup_stale_segments}`'s liveness-driven sweep: both walk a bounded
//! set of records, ask a liveness oracle whether the owning process is
//! still around, and reclaim resources only for the dead ones. Here the
//! records are [`TransactionLog`](crate::transaction_log::TransactionLog)
//! entries rather than whole shared-memory segments, and reclaiming means
//! decrementing a refcount rather than `shm_unlink`.

use crate::error::Result;
use crate::event_data_control::EventDataControl;
use crate::liveness::LivenessOracle;
use crate::transaction_log::TransactionLogSet;
use crate::MAX_PROXIES;

/// Runs a liveness sweep over one event's proxy transaction logs.
pub struct SlotCollector<'a, O: LivenessOracle> {
    tls: &'a TransactionLogSet,
    edc: &'a EventDataControl<'a>,
    oracle: &'a O,
}

impl<'a, O: LivenessOracle> SlotCollector<'a, O> {
    #[must_use]
    pub fn new(tls: &'a TransactionLogSet, edc: &'a EventDataControl<'a>, oracle: &'a O) -> Self {
        Self { tls, edc, oracle }
    }

    /// Sweep every registered proxy log: for each one whose owning PID is
    /// no longer alive, roll back its dangling references (decrementing
    /// the matching slot's refcount exactly once per open begin/commit
    /// pair) and free its log slot. Returns the number of proxies
    /// reclaimed (spec §4.5).
    ///
    /// A proxy whose PID is still alive — even one that has simply not
    /// called `reference_next_event` in a while — is left untouched: a
    /// slow reader is not a crashed one, and this module must never
    /// reclaim a reference out from under a process that might still
    /// dereference it itself.
    pub fn sweep(&self) -> Result<usize> {
        let mut reclaimed = 0;
        for proxy_idx in 0..MAX_PROXIES {
            let pid = match self.log_owner_pid(proxy_idx)? {
                Some(pid) if pid != 0 => pid,
                _ => continue,
            };
            if self.oracle.is_alive(pid) {
                continue;
            }
            self.reclaim_proxy(proxy_idx)?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    fn log_owner_pid(&self, proxy_idx: usize) -> Result<Option<u32>> {
        // Only registered logs carry a meaningful owner; an empty slot's
        // owner_pid reads back as 0, indistinguishable from "not
        // registered", which `sweep` treats the same way (skip).
        Ok(Some(self.tls.owner_pid(proxy_idx)?))
    }

    fn reclaim_proxy(&self, proxy_idx: usize) -> Result<()> {
        let edc = self.edc;
        self.tls.rollback(proxy_idx, |slot| {
            edc.decrement_refcount(slot);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::FakeLivenessOracle;
    use crate::slot_word::{SlotWord, T_MAX};

    #[test]
    fn sweep_reclaims_dangling_reference_from_dead_proxy() {
        let slots: Vec<SlotWord> = (0..2).map(|_| SlotWord::new()).collect();
        let tls = TransactionLogSet::new();
        let edc = EventDataControl::new(&slots, &tls);

        let proxy = tls.register_proxy(999).unwrap();
        let slot = edc.allocate_next_slot().unwrap();
        edc.event_ready(slot, 1);
        edc.reference_next_event(proxy, 0, T_MAX).unwrap().unwrap();
        assert_eq!(slots[slot as usize].refcount(), 1);

        let oracle = FakeLivenessOracle::new(); // 999 is not alive
        let collector = SlotCollector::new(&tls, &edc, &oracle);
        let reclaimed = collector.sweep().unwrap();

        assert_eq!(reclaimed, 1);
        assert_eq!(slots[slot as usize].refcount(), 0);
        assert!(!tls.skeleton_log().is_registered());
    }

    #[test]
    fn sweep_leaves_alive_proxies_untouched() {
        let slots: Vec<SlotWord> = (0..2).map(|_| SlotWord::new()).collect();
        let tls = TransactionLogSet::new();
        let edc = EventDataControl::new(&slots, &tls);

        let proxy = tls.register_proxy(42).unwrap();
        let slot = edc.allocate_next_slot().unwrap();
        edc.event_ready(slot, 1);
        edc.reference_next_event(proxy, 0, T_MAX).unwrap().unwrap();

        let oracle = FakeLivenessOracle::new().with_alive(42);
        let collector = SlotCollector::new(&tls, &edc, &oracle);
        assert_eq!(collector.sweep().unwrap(), 0);
        assert_eq!(slots[slot as usize].refcount(), 1);
    }
}
