// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `SampleAllocateePtr`: a scoped handle over a claimed-but-not-yet-sent
//! publication slot.
//!
//! Grounded on `original_source/.../sample_allocatee_ptr.h`, which
//! documents itself as deliberately mimicking `std::unique_ptr` without
//! letting callers supply a custom deleter — the commit-or-discard
//! behavior must be exactly one of two fixed outcomes, never a
//! caller-substitutable one, so a misbehaving deleter can't leak a slot.
//! This type reaches the same guarantee through Rust's ownership model
//! instead: there is no deleter parameter at all, and `Drop` is the only
//! path to "discard".
//!
//! The handle writes directly into the slot's backing cell rather than an
//! owned copy, so publication is genuinely zero-copy: the bytes a
//! subscriber eventually reads are the same bytes the allocating call
//! wrote, never re-serialized in between.

use crate::event_data_control::EventDataControl;
use crate::SlotIndex;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

/// Owns exclusive write access to payload `T` in a just-allocated slot.
/// Call [`send`](Self::send) to publish it; letting the handle drop
/// without sending discards the slot back to Invalid, the same recovery
/// path a publisher that errors out mid-write gets for free.
///
/// # Safety invariant
///
/// The `SlotWord` for `slot` must already be in the InWriting state
/// (i.e. `cell` came from `EventDataControl::allocate_next_slot`) and no
/// other handle for the same `cell` may exist concurrently — both are
/// guaranteed by construction: only `allocate_next_slot`'s winning CAS
/// produces a `SampleAllocateePtr`, and a slot in InWriting state is
/// never handed out again until `event_ready` or `discard` returns it to
/// Ready or Invalid.
pub struct SampleAllocateePtr<'a, T> {
    edc: &'a EventDataControl<'a>,
    slot: SlotIndex,
    cell: &'a UnsafeCell<T>,
    sent: bool,
}

impl<'a, T> SampleAllocateePtr<'a, T> {
    #[must_use]
    pub fn new(edc: &'a EventDataControl<'a>, slot: SlotIndex, cell: &'a UnsafeCell<T>) -> Self {
        Self {
            edc,
            slot,
            cell,
            sent: false,
        }
    }

    #[must_use]
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Publish the slot with `timestamp`, consuming the handle. After
    /// this returns the slot is visible to subscribers; `Drop` becomes a
    /// no-op for it.
    pub fn send(mut self, timestamp: u32) {
        self.edc
            .event_ready(self.slot, timestamp as crate::slot_word::Timestamp);
        self.sent = true;
    }
}

impl<T> Deref for SampleAllocateePtr<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see the struct-level safety invariant — this handle is
        // the sole accessor of `cell` for as long as it exists.
        unsafe { &*self.cell.get() }
    }
}

impl<T> DerefMut for SampleAllocateePtr<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: same as `deref`, and `&mut self` rules out any other
        // live borrow of this handle.
        unsafe { &mut *self.cell.get() }
    }
}

impl<T> Drop for SampleAllocateePtr<'_, T> {
    fn drop(&mut self) {
        if !self.sent {
            self.edc.discard(self.slot);
        }
    }
}
