// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event Data Control Composite (C4): publishes through a QM and an
//! optional ASIL [`EventDataControl`] pair for mixed-criticality events,
//! enforcing the "safety wins" disconnect policy (spec §4.4).
//!
//! Grounded on `transport::shm::policy::ShmPolicy`'s two-tier
//! select-or-fall-back shape, generalized from "pick one transport" to
//! "write through both, and drop the lower-criticality one on its own
//! failure rather than let it block the higher-criticality one."

use crate::error::{LolaError, Result};
use crate::event_data_control::EventDataControl;
use crate::slot_word::Timestamp;
use crate::SlotIndex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Allocation result naming which side(s) a slot was claimed on, so the
/// caller's `event_ready`/`discard` can address the same sides. `qm` is
/// `None` once the QM side has been permanently disconnected (spec §4.4.1)
/// and every subsequent publication is ASIL-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeSlot {
    pub qm: Option<SlotIndex>,
    pub asil: Option<SlotIndex>,
}

/// Wraps one QM-rated [`EventDataControl`] and, for ASIL-tagged events, a
/// second ASIL-rated one over an independent control region (spec §4.4,
/// §6 "two named shared-memory objects ... for an ASIL-tagged event").
///
/// A QM-only event never constructs the ASIL side; `asil` is `None` for
/// the lifetime of the composite in that case, and every method degrades
/// to plain passthrough on `qm`.
pub struct EventDataControlComposite<'a> {
    qm: EventDataControl<'a>,
    asil: Option<EventDataControl<'a>>,
    /// Set once QM allocation has failed and the QM side has been
    /// permanently amputated from future publications (spec §4.4.1); ASIL
    /// publication continues on its own. Safety wins: a misbehaving QM-side
    /// consumer hoarding refcounts must never be able to starve the
    /// safety-rated ASIL stream.
    qm_disconnected: AtomicBool,
}

impl<'a> EventDataControlComposite<'a> {
    #[must_use]
    pub fn new(qm: EventDataControl<'a>, asil: Option<EventDataControl<'a>>) -> Self {
        Self {
            qm,
            asil,
            qm_disconnected: AtomicBool::new(false),
        }
    }

    /// `true` once the QM side has been permanently dropped from this
    /// composite's publications after a QM allocation failure (spec
    /// §4.4.1). Only ever set on a dual (QM+ASIL) composite.
    #[must_use]
    pub fn is_qm_disconnected(&self) -> bool {
        self.qm_disconnected.load(Ordering::Acquire)
    }

    /// Claim a slot on both sides for an ASIL-tagged publication, or just
    /// the QM side for a QM-only event. Safety wins (spec §4.4.1): if QM
    /// allocation fails — e.g. a misbehaving QM-side consumer is holding
    /// every QM slot's refcount — the composite falls back to an
    /// ASIL-only allocation, returns success, and permanently amputates
    /// the QM side so the failure can never again block publication. An
    /// ASIL allocation failure while ASIL is still connected is fatal to
    /// this publication (spec §4.4 point i) — ASIL consumers must never
    /// silently miss a sample that a QM consumer saw.
    pub fn allocate_next_slot(&self) -> Result<CompositeSlot> {
        if self.is_qm_disconnected() {
            return self.allocate_asil_only();
        }

        match self.qm.allocate_next_slot() {
            Ok(qm_slot) => {
                let Some(asil) = self.asil.as_ref() else {
                    return Ok(CompositeSlot { qm: Some(qm_slot), asil: None });
                };
                match asil.allocate_next_slot() {
                    Ok(asil_slot) => Ok(CompositeSlot {
                        qm: Some(qm_slot),
                        asil: Some(asil_slot),
                    }),
                    Err(_) => {
                        // Safety wins: undo the QM claim rather than publish
                        // to QM subscribers a sample ASIL subscribers will
                        // never see.
                        self.qm.discard(qm_slot);
                        Err(LolaError::AsilAllocationFailed)
                    }
                }
            }
            Err(err) => {
                if self.asil.is_none() {
                    return Err(err);
                }
                let slot = self.allocate_asil_only()?;
                self.qm_disconnected.store(true, Ordering::Release);
                Ok(slot)
            }
        }
    }

    fn allocate_asil_only(&self) -> Result<CompositeSlot> {
        let asil = self
            .asil
            .as_ref()
            .expect("qm_disconnected is only ever set on a dual composite");
        let asil_slot = asil.allocate_next_slot()?;
        Ok(CompositeSlot { qm: None, asil: Some(asil_slot) })
    }

    /// Publish both sides of a [`CompositeSlot`] with the same timestamp
    /// (spec §4.4 point iii — both sides share one monotone counter).
    pub fn event_ready(&self, slot: CompositeSlot, timestamp: Timestamp) {
        if let Some(qm_slot) = slot.qm {
            self.qm.event_ready(qm_slot, timestamp);
        }
        if let Some(asil_slot) = slot.asil {
            if let Some(asil) = &self.asil {
                asil.event_ready(asil_slot, timestamp);
            }
        }
    }

    /// Abandon both sides of a claimed slot without publishing.
    pub fn discard(&self, slot: CompositeSlot) {
        if let Some(qm_slot) = slot.qm {
            self.qm.discard(qm_slot);
        }
        if let Some(asil_slot) = slot.asil {
            if let Some(asil) = &self.asil {
                asil.discard(asil_slot);
            }
        }
    }

    #[must_use]
    pub fn qm(&self) -> &EventDataControl<'a> {
        &self.qm
    }

    #[must_use]
    pub fn asil(&self) -> Option<&EventDataControl<'a>> {
        self.asil.as_ref()
    }

    /// Force `is_qm_disconnected()`'s return value, for the `test_support`
    /// Attorney seam only (original: `SetQmControlDisconnected`).
    #[cfg(test)]
    pub(crate) fn set_qm_disconnected_for_test(&self, value: bool) {
        self.qm_disconnected.store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot_word::SlotWord;
    use crate::transaction_log::TransactionLogSet;

    fn make<'a>(
        qm_slots: &'a [SlotWord],
        qm_tls: &'a TransactionLogSet,
    ) -> EventDataControl<'a> {
        EventDataControl::new(qm_slots, qm_tls)
    }

    #[test]
    fn qm_only_composite_allocates_on_qm_side_alone() {
        let qm_slots: Vec<SlotWord> = (0..2).map(|_| SlotWord::new()).collect();
        let qm_tls = TransactionLogSet::new();
        let qm = make(&qm_slots, &qm_tls);
        let composite = EventDataControlComposite::new(qm, None);

        let slot = composite.allocate_next_slot().unwrap();
        assert!(slot.asil.is_none());
        let qm_idx = slot.qm.unwrap();
        composite.event_ready(slot, 1);
        assert!(qm_slots[qm_idx as usize].is_ready());
    }

    #[test]
    fn dual_composite_allocates_both_sides_with_shared_timestamp() {
        let qm_slots: Vec<SlotWord> = (0..2).map(|_| SlotWord::new()).collect();
        let qm_tls = TransactionLogSet::new();
        let qm = make(&qm_slots, &qm_tls);

        let asil_slots: Vec<SlotWord> = (0..2).map(|_| SlotWord::new()).collect();
        let asil_tls = TransactionLogSet::new();
        let asil = make(&asil_slots, &asil_tls);

        let composite = EventDataControlComposite::new(qm, Some(asil));
        let slot = composite.allocate_next_slot().unwrap();
        let qm_idx = slot.qm.unwrap();
        let asil_idx = slot.asil.unwrap();
        composite.event_ready(slot, 7);

        assert_eq!(qm_slots[qm_idx as usize].timestamp(), 7);
        assert_eq!(asil_slots[asil_idx as usize].timestamp(), 7);
    }

    #[test]
    fn asil_exhaustion_rolls_back_qm_claim() {
        let qm_slots: Vec<SlotWord> = (0..2).map(|_| SlotWord::new()).collect();
        let qm_tls = TransactionLogSet::new();
        let qm = make(&qm_slots, &qm_tls);

        // Single ASIL slot, pre-claimed, so the composite's own
        // allocation attempt is guaranteed to fail.
        let asil_slots: Vec<SlotWord> = (0..1).map(|_| SlotWord::new()).collect();
        asil_slots[0].cas((0, 0), (u16::MAX, u16::MAX));
        let asil_tls = TransactionLogSet::new();
        let asil = make(&asil_slots, &asil_tls);

        let composite = EventDataControlComposite::new(qm, Some(asil));
        let before = qm_slots.iter().filter(|s| s.is_invalid()).count();
        assert!(matches!(
            composite.allocate_next_slot(),
            Err(LolaError::AsilAllocationFailed)
        ));
        let after = qm_slots.iter().filter(|s| s.is_invalid()).count();
        assert_eq!(before, after, "QM claim must be discarded, not leaked");
    }

    #[test]
    fn qm_exhaustion_falls_back_to_asil_only_and_disconnects_qm() {
        let qm_slots: Vec<SlotWord> = (0..2).map(|_| SlotWord::new()).collect();
        // Simulate a misbehaving QM consumer holding every QM-side
        // refcount, so QM allocation is guaranteed to fail.
        for slot in &qm_slots {
            slot.cas((0, 0), (u16::MAX, u16::MAX));
        }
        let qm_tls = TransactionLogSet::new();
        let qm = make(&qm_slots, &qm_tls);

        let asil_slots: Vec<SlotWord> = (0..2).map(|_| SlotWord::new()).collect();
        let asil_tls = TransactionLogSet::new();
        let asil = make(&asil_slots, &asil_tls);

        let composite = EventDataControlComposite::new(qm, Some(asil));
        assert!(!composite.is_qm_disconnected());

        let slot = composite.allocate_next_slot().unwrap();
        assert!(slot.qm.is_none());
        assert!(slot.asil.is_some());
        assert!(composite.is_qm_disconnected());

        // Subsequent allocations stay ASIL-only without retrying QM.
        let second = composite.allocate_next_slot().unwrap();
        assert!(second.qm.is_none());
        assert!(second.asil.is_some());
    }
}
