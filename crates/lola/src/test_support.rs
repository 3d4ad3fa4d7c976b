// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attorney-style test seams (spec §4: "each core type exposes a
//! `#[cfg(test)]`-only `*Attorney` accessor ... without widening the
//! production API"), grounded on
//! `original_source/.../event_data_control_test_resources.h`'s
//! `EventDataControlAttorney`/`EventDataControlCompositeAttorney`: the
//! original's hand-picked observation/setup points for the unit tests of
//! other modules, not a public surface of this crate. `#[cfg(test)]`-gated
//! top to bottom, and only ever used from the `#[cfg(test)] mod tests` of
//! the files in this crate — never from the integration tests in `tests/`,
//! which link against the non-test build and cannot see it.

#![cfg(test)]

use crate::composite::EventDataControlComposite;
use crate::event_data_control::EventDataControl;
use crate::slot_word::Timestamp;
use crate::SlotIndex;

/// Test seam onto one [`EventDataControl`]'s slot array (original:
/// `EventDataControlAttorney`).
pub(crate) struct EventDataControlAttorney<'a> {
    edc: &'a EventDataControl<'a>,
}

impl<'a> EventDataControlAttorney<'a> {
    pub(crate) fn new(edc: &'a EventDataControl<'a>) -> Self {
        Self { edc }
    }

    /// Drive every slot to Invalid, then — if `expected` is `Some` — give
    /// that one slot a free (`R == 0`) state so the next
    /// `allocate_next_slot()` is guaranteed to return it (original:
    /// `PrepareAllocateNextSlot`).
    pub(crate) fn prepare_allocate_next_slot(&self, expected: Option<SlotIndex>) {
        for slot in self.edc.slots_for_test() {
            slot.store_release(0, 0);
        }
        if let Some(idx) = expected {
            self.edc.slots_for_test()[idx as usize].store_release(1, 0);
        }
    }

    /// Drive every slot to Invalid, then — if `expected` is `Some` — give
    /// that one slot timestamp `last_search_time + 1` and refcount 0, so
    /// the next `reference_next_event(_, last_search_time, _)` is
    /// guaranteed to return it (original: `PrepareReferenceNextEvent`).
    pub(crate) fn prepare_reference_next_event(
        &self,
        expected: Option<SlotIndex>,
        last_search_time: Timestamp,
    ) {
        for slot in self.edc.slots_for_test() {
            slot.store_release(0, 0);
        }
        if let Some(idx) = expected {
            self.edc.slots_for_test()[idx as usize]
                .store_release(last_search_time.wrapping_add(1), 0);
        }
    }

    /// Give the first `expected` slots timestamps `reference_time + 1, +
    /// 2, ...` and drive the rest to Invalid, so the next
    /// `get_num_new_events(reference_time)` is guaranteed to return
    /// `expected` (original: `PrepareGetNumNewEvents`).
    pub(crate) fn prepare_get_num_new_events(&self, expected: usize, reference_time: Timestamp) {
        for (i, slot) in self.edc.slots_for_test().iter().enumerate() {
            if i < expected {
                let ts = reference_time.wrapping_add(1 + i as Timestamp);
                slot.store_release(ts, 0);
            } else {
                slot.store_release(0, 0);
            }
        }
    }
}

/// Test seam onto an [`EventDataControlComposite`] (original:
/// `EventDataControlCompositeAttorney`).
pub(crate) struct EventDataControlCompositeAttorney<'a> {
    composite: &'a EventDataControlComposite<'a>,
}

impl<'a> EventDataControlCompositeAttorney<'a> {
    pub(crate) fn new(composite: &'a EventDataControlComposite<'a>) -> Self {
        Self { composite }
    }

    /// Force `is_qm_disconnected()`'s next read without driving a real QM
    /// allocation failure (original: `SetQmControlDisconnected`).
    pub(crate) fn set_qm_control_disconnected(&self, disconnected: bool) {
        self.composite.set_qm_disconnected_for_test(disconnected);
    }

    /// Ready status of `slot_index` on each side currently in play
    /// (original: `GetSlotStatus`, returning `EventSlotStatus` pairs; here
    /// narrowed to the one bit most tests need).
    pub(crate) fn slot_is_ready(&self, slot_index: SlotIndex) -> (bool, Option<bool>) {
        let qm_ready = self.composite.qm().slots_for_test()[slot_index as usize].is_ready();
        let asil_ready = self
            .composite
            .asil()
            .map(|asil| asil.slots_for_test()[slot_index as usize].is_ready());
        (qm_ready, asil_ready)
    }
}
