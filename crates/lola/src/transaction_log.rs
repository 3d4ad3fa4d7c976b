// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transaction Log Set (TLS): per-event registry of per-subscriber
//! reference records, enabling crash recovery.
//!
//! Writing order for a reference transaction, per `spec.md` §4.3:
//! `begin := true; fence; mutate refcount; fence; commit := true`.
//! Clearing: `commit := false; fence; dereference; fence; begin := false`.
//! This module only records the begin/commit markers; the refcount
//! mutation itself happens on the [`crate::event_data_control::EventDataControl`]
//! this log's event owns — callers (the facades in `facade.rs`) are
//! responsible for interleaving the two calls in that exact order.
//!
//! Bounded, fixed-capacity arrays throughout (`SLOT_MAX` slots,
//! `MAX_PROXIES` proxy logs plus one skeleton sentinel slot), matching the
//! static-allocation discipline of `transport::shm` (fixed
//! `NOTIFY_BUCKET_COUNT`, fixed slab size classes) — required here because
//! the layout must be identical across independently compiled processes.

use crate::error::{LolaError, Result};
use crate::{SlotIndex, MAX_PROXIES, SLOT_MAX};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Reserved proxy index for the publisher's own outstanding references,
/// used by tracing (spec §3 "a special skeleton transaction log").
pub const SKELETON_INDEX_SENTINEL: usize = MAX_PROXIES;

/// Begin/commit marker pair for one slot's reference transaction.
#[repr(C)]
#[derive(Debug)]
struct RefTxn {
    begin: AtomicBool,
    commit: AtomicBool,
}

impl RefTxn {
    const fn new() -> Self {
        Self {
            begin: AtomicBool::new(false),
            commit: AtomicBool::new(false),
        }
    }
}

/// Per-(event, subscriber) transaction record.
#[repr(C)]
pub struct TransactionLog {
    /// `true` once this log slot has been handed to a registered proxy.
    registered: AtomicBool,
    /// Owning subscriber's PID, used by the Slot Collector's liveness
    /// check. Zero when unregistered.
    owner_pid: AtomicU32,
    subscribe_begin: AtomicBool,
    subscribe_commit: AtomicBool,
    reference: [RefTxn; SLOT_MAX],
}

impl TransactionLog {
    const fn new() -> Self {
        Self {
            registered: AtomicBool::new(false),
            owner_pid: AtomicU32::new(0),
            subscribe_begin: AtomicBool::new(false),
            subscribe_commit: AtomicBool::new(false),
            reference: [const { RefTxn::new() }; SLOT_MAX],
        }
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn owner_pid(&self) -> u32 {
        self.owner_pid.load(Ordering::Acquire)
    }

    /// `true` if this slot has an outstanding begin-without-commit
    /// reference transaction for `slot` — the signature of a crash
    /// mid-`reference_next_event`, before the refcount CAS is known to
    /// have landed.
    #[must_use]
    pub fn has_dangling_reference(&self, slot: SlotIndex) -> bool {
        let txn = &self.reference[slot as usize];
        txn.begin.load(Ordering::Acquire) && !txn.commit.load(Ordering::Acquire)
    }

    /// `true` if `slot` has any open reference transaction at all —
    /// `begin` set, whether or not `commit` followed (spec §4.3: "the
    /// refcount on slot i may or may not have been incremented; the Slot
    /// Collector resolves by decrementing once if begin is set"). Every
    /// such slot owes the Collector exactly one refcount decrement,
    /// whether the crash landed before the CAS, after it but before
    /// `commit` was marked, or after a full commit with no matching
    /// `dereference`.
    #[must_use]
    pub fn has_outstanding_reference(&self, slot: SlotIndex) -> bool {
        self.reference[slot as usize].begin.load(Ordering::Acquire)
    }

    fn mark_subscribe_begin(&self) {
        self.subscribe_begin.store(true, Ordering::Release);
    }

    fn mark_subscribe_commit(&self) {
        self.subscribe_commit.store(true, Ordering::Release);
    }

    /// Record "I am about to bump the refcount on `slot`" before the CAS
    /// that actually does so becomes visible (spec §4.2.4 side effect).
    pub fn mark_reference_begin(&self, slot: SlotIndex) {
        self.reference[slot as usize]
            .begin
            .store(true, Ordering::Release);
    }

    /// Record "the refcount bump on `slot` completed" (spec §4.2.4/§4.3).
    pub fn mark_reference_commit(&self, slot: SlotIndex) {
        self.reference[slot as usize]
            .commit
            .store(true, Ordering::Release);
    }

    /// Clear a reference transaction on release, in the order
    /// `commit := false; fence; dereference; fence; begin := false`. The
    /// caller performs the dereference between the two halves of this
    /// call.
    pub fn clear_reference_commit(&self, slot: SlotIndex) {
        self.reference[slot as usize]
            .commit
            .store(false, Ordering::Release);
    }

    pub fn clear_reference_begin(&self, slot: SlotIndex) {
        self.reference[slot as usize]
            .begin
            .store(false, Ordering::Release);
    }

    /// (T-3) at most one outstanding begin-without-commit at a time per
    /// slot — true by construction since `mark_reference_begin` is only
    /// called by the single subscriber owning this log, and the previous
    /// transaction must have cleared `begin` before a new one starts.
    fn reset(&self) {
        self.owner_pid.store(0, Ordering::Release);
        self.subscribe_begin.store(false, Ordering::Release);
        self.subscribe_commit.store(false, Ordering::Release);
        for txn in &self.reference {
            txn.begin.store(false, Ordering::Release);
            txn.commit.store(false, Ordering::Release);
        }
        self.registered.store(false, Ordering::Release);
    }
}

/// Per-event registry of [`TransactionLog`]s: one per registered proxy,
/// plus [`SKELETON_INDEX_SENTINEL`] for the publisher's own tracing log.
///
/// `repr(C)` for the same cross-process-ABI reason as
/// [`crate::subscription::SubscriptionControl`]; `arena::ArenaLayout`
/// places this record in the control region at a computed offset.
#[repr(C)]
pub struct TransactionLogSet {
    logs: [TransactionLog; MAX_PROXIES + 1],
}

impl TransactionLogSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: [const { TransactionLog::new() }; MAX_PROXIES + 1],
        }
    }

    fn log(&self, index: usize) -> Result<&TransactionLog> {
        self.logs
            .get(index)
            .ok_or(LolaError::IndexOutOfBounds {
                index,
                bound: MAX_PROXIES,
            })
    }

    #[must_use]
    pub fn skeleton_log(&self) -> &TransactionLog {
        &self.logs[SKELETON_INDEX_SENTINEL]
    }

    /// Owning PID of `proxy_idx`'s log, or `0` if the slot is not
    /// currently registered (used by `collector::SlotCollector`'s sweep).
    pub fn owner_pid(&self, proxy_idx: usize) -> Result<u32> {
        Ok(self.log(proxy_idx)?.owner_pid())
    }

    /// Allocate a free log slot for `owner_pid`. Returns
    /// `LolaError::TracingSlotExhausted` if every proxy slot (excluding
    /// the skeleton sentinel) is taken.
    pub fn register_proxy(&self, owner_pid: u32) -> Result<usize> {
        for (idx, log) in self.logs[..MAX_PROXIES].iter().enumerate() {
            if log
                .registered
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                log.owner_pid.store(owner_pid, Ordering::Release);
                log.mark_subscribe_begin();
                log.mark_subscribe_commit();
                return Ok(idx);
            }
        }
        Err(LolaError::TracingSlotExhausted)
    }

    /// Release a proxy's log slot on clean unsubscribe (counterpart of
    /// `register_proxy`; spec §8 (R-2)).
    pub fn unregister_proxy(&self, proxy_idx: usize) -> Result<()> {
        self.log(proxy_idx)?.reset();
        Ok(())
    }

    pub fn mark_reference_begin(&self, proxy_idx: usize, slot: SlotIndex) -> Result<()> {
        self.log(proxy_idx)?.mark_reference_begin(slot);
        Ok(())
    }

    pub fn mark_reference_commit(&self, proxy_idx: usize, slot: SlotIndex) -> Result<()> {
        self.log(proxy_idx)?.mark_reference_commit(slot);
        Ok(())
    }

    pub fn clear_reference_commit(&self, proxy_idx: usize, slot: SlotIndex) -> Result<()> {
        self.log(proxy_idx)?.clear_reference_commit(slot);
        Ok(())
    }

    pub fn clear_reference_begin(&self, proxy_idx: usize, slot: SlotIndex) -> Result<()> {
        self.log(proxy_idx)?.clear_reference_begin(slot);
        Ok(())
    }

    /// Clear both markers for `slot` without an intervening dereference —
    /// used to undo a `mark_reference_begin` whose paired CAS failed and
    /// never actually mutated the refcount (see
    /// `EventDataControl::reference_next_event`).
    pub fn abort_reference_begin(&self, proxy_idx: usize, slot: SlotIndex) -> Result<()> {
        let log = self.log(proxy_idx)?;
        log.clear_reference_commit(slot);
        log.clear_reference_begin(slot);
        Ok(())
    }

    /// Roll back every outstanding reference for `proxy_idx`: for each
    /// slot with `begin` set — whether or not `commit` followed — call
    /// `on_dangling_slot` exactly once so the caller decrements that
    /// slot's refcount, then clear every marker. A `begin && !commit`
    /// slot is a crash before the CAS was known to land; a `begin &&
    /// commit` slot is a crash after a completed `reference_next_event`
    /// with no matching `dereference`. Both owe the Collector the same
    /// single decrement (spec §4.3: "for each with commit, clear both ...
    /// its refcount will be dropped by the Collector"). The proxy's log
    /// slot is freed at the end (spec §4.3.1, §4.5).
    ///
    /// `on_dangling_slot` is called once per slot index with an open
    /// reference transaction so the caller (the Collector, which has
    /// access to the owning
    /// [`crate::event_data_control::EventDataControl`]) can perform the
    /// matching refcount decrement; this type has no reference to the EDC
    /// by design (it only owns transaction records).
    pub fn rollback(&self, proxy_idx: usize, mut on_dangling_slot: impl FnMut(SlotIndex)) -> Result<()> {
        let log = self.log(proxy_idx)?;
        for slot in 0..SLOT_MAX {
            let slot_idx = slot as SlotIndex;
            if log.has_outstanding_reference(slot_idx) {
                on_dangling_slot(slot_idx);
            }
        }
        log.reset();
        Ok(())
    }
}

impl Default for TransactionLogSet {
    fn default() -> Self {
        Self::new()
    }
}
