// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Skeleton/Proxy Event façades (C8): thin typed wrappers tying together
//! the composite, subscription admission, transaction log and sample
//! storage into the `Offer`/`Allocate`/`Send`/`Subscribe`/`GetNewSamples`
//! surface generated bindings call.
//!
//! Grounded on `original_source/.../skeleton_event.h`: same operations,
//! same error-logging-then-mapping convention (`log::error!` immediately
//! before returning a [`ComErrc`], mirroring the original's
//! `score::mw::log::LogError("lola") << "..."; return
//! MakeUnexpected(ComErrc::...)`), adapted to `Result<T, ComErrc>` instead
//! of a custom `Expected` type.
//!
//! This crate never moves payload bytes over real shared memory (an
//! explicit Non-goal); [`SamplePool`] is the in-process stand-in a host
//! binding's code generator would otherwise lay out over the data region
//! `arena.rs` addresses by offset. Swapping `SamplePool` for a real
//! `MappedRegion`-backed array is a host integration concern, not a
//! change to the control-plane algorithms these façades drive.

use crate::composite::EventDataControlComposite;
use crate::error::{ComErrc, LolaError};
use crate::event_data_control::EventDataControl;
use crate::notifier::Notifier;
use crate::sample_ptr::SampleAllocateePtr;
use crate::slot_word::{Timestamp, T_INVALID, T_IN_WRITING, T_MAX};
use crate::subscription::SubscriptionControl;
use crate::tracing_hook::TracingHook;
use crate::transaction_log::TransactionLogSet;
use crate::SlotIndex;
use std::cell::{Cell, UnsafeCell};
use std::sync::atomic::{AtomicBool, Ordering};

/// Fixed-size, index-addressed sample storage parallel to an event's slot
/// array. See the module doc for why this stands in for a real mapped
/// data region.
pub struct SamplePool<T> {
    cells: Box<[UnsafeCell<T>]>,
}

// SAFETY: access to a given cell is always gated by the parallel
// `SlotWord`'s state (InWriting for the sole writer, Ready/refcounted for
// readers), the same discipline `EventDataControl` itself relies on; the
// pool never hands out two live accessors to the same cell at once.
unsafe impl<T: Send> Sync for SamplePool<T> {}

impl<T: Default> SamplePool<T> {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| UnsafeCell::new(T::default())).collect(),
        }
    }
}

impl<T> SamplePool<T> {
    fn cell(&self, slot: SlotIndex) -> &UnsafeCell<T> {
        &self.cells[slot as usize]
    }
}

/// Skeleton-side (publisher) façade for one event.
pub struct SkeletonEvent<'a, T> {
    composite: EventDataControlComposite<'a>,
    qm_samples: &'a SamplePool<T>,
    asil_samples: Option<&'a SamplePool<T>>,
    notifier: &'a dyn Notifier,
    tracing: &'a dyn TracingHook,
    next_timestamp: Cell<Timestamp>,
    offered: AtomicBool,
}

impl<'a, T> SkeletonEvent<'a, T> {
    #[must_use]
    pub fn new(
        composite: EventDataControlComposite<'a>,
        qm_samples: &'a SamplePool<T>,
        asil_samples: Option<&'a SamplePool<T>>,
        notifier: &'a dyn Notifier,
        tracing: &'a dyn TracingHook,
    ) -> Self {
        Self {
            composite,
            qm_samples,
            asil_samples,
            notifier,
            tracing,
            next_timestamp: Cell::new(T_INVALID),
            offered: AtomicBool::new(false),
        }
    }

    /// Start offering the event. Resets the monotone timestamp counter,
    /// so a prior `StopOffer`/`Offer` cycle is the documented recovery
    /// path from `TimestampExhausted` (spec §4.2.1, `DESIGN.md` — open
    /// question: timestamp overflow policy).
    pub fn offer(&self) {
        self.next_timestamp.set(T_INVALID);
        self.offered.store(true, Ordering::Release);
    }

    pub fn stop_offer(&self) {
        self.offered.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_offered(&self) -> bool {
        self.offered.load(Ordering::Acquire)
    }

    /// `true` once a QM allocation failure has permanently amputated the
    /// QM side of this event's publications (spec §4.4.1); always `false`
    /// on a QM-only event.
    #[must_use]
    pub fn is_qm_disconnected(&self) -> bool {
        self.composite.is_qm_disconnected()
    }

    fn advance_timestamp(&self) -> std::result::Result<Timestamp, ComErrc> {
        let next = self.next_timestamp.get().wrapping_add(1);
        if next == T_INVALID || next == T_IN_WRITING || next == T_MAX {
            log::error!("lola: event timestamp counter exhausted, re-offer required");
            return Err(ComErrc::from(LolaError::TimestampExhausted));
        }
        self.next_timestamp.set(next);
        Ok(next)
    }

    /// Claim a slot for an in-place write (spec §4.2.1 `Allocate`). Only
    /// the QM side is claimed — zero-copy in-place allocation does not
    /// extend across the ASIL mirror, matching the original binding's own
    /// restriction of `Allocate`/`SampleAllocateePtr` to the non-dual
    /// path; `send` below is the dual-capable, copy-based alternative.
    pub fn allocate(&'a self) -> std::result::Result<SampleAllocateePtr<'a, T>, ComErrc>
    where
        T: Default,
    {
        if !self.is_offered() {
            log::error!("lola: Allocate called on an event that has not been offered");
            return Err(ComErrc::kNotOffered);
        }
        let slot = self.composite.qm().allocate_next_slot().map_err(|err| {
            log::error!("lola: Allocate failed: {err}");
            ComErrc::from(err)
        })?;
        self.tracing.on_allocate(slot);
        Ok(SampleAllocateePtr::new(
            self.composite.qm(),
            slot,
            self.qm_samples.cell(slot),
        ))
    }

    /// Publish a handle previously obtained from `allocate`, assigning it
    /// the next monotone timestamp.
    pub fn commit(&self, handle: SampleAllocateePtr<'a, T>) -> std::result::Result<(), ComErrc> {
        let ts = self.advance_timestamp()?;
        let slot = handle.slot();
        handle.send(u32::from(ts));
        self.tracing.on_send(slot, u32::from(ts));
        self.notifier.notify();
        Ok(())
    }

    /// Publish `value` by copy through both composite sides (spec §4.2.1
    /// `Send(const EventType&)`, §4.4 dual publication).
    pub fn send(&self, value: T) -> std::result::Result<(), ComErrc>
    where
        T: Copy,
    {
        if !self.is_offered() {
            log::error!("lola: Send called on an event that has not been offered");
            return Err(ComErrc::kNotOffered);
        }
        let ts = self.advance_timestamp()?;
        let slot = self.composite.allocate_next_slot().map_err(|err| {
            log::error!("lola: Send failed to allocate: {err}");
            ComErrc::from(err)
        })?;

        // SAFETY: whichever of slot.qm/slot.asil is Some is InWriting and
        // exclusively owned by this call until `event_ready` below.
        if let Some(qm_slot) = slot.qm {
            unsafe {
                *self.qm_samples.cell(qm_slot).get() = value;
            }
        }
        if let (Some(asil_slot), Some(pool)) = (slot.asil, self.asil_samples) {
            // SAFETY: same as above, for the ASIL mirror.
            unsafe {
                *pool.cell(asil_slot).get() = value;
            }
        }

        self.composite.event_ready(slot, ts);
        let traced_slot = slot.qm.or(slot.asil).unwrap_or_default();
        self.tracing.on_send(traced_slot, u32::from(ts));
        self.notifier.notify();
        Ok(())
    }
}

/// Proxy-side (subscriber) façade for one event.
pub struct ProxyEvent<'a, T> {
    edc: &'a EventDataControl<'a>,
    samples: &'a SamplePool<T>,
    tls: &'a TransactionLogSet,
    subscription: &'a SubscriptionControl,
    tracing: &'a dyn TracingHook,
    proxy_idx: Cell<Option<usize>>,
    last_seen_ts: Cell<Timestamp>,
    max_sample_count: u32,
}

impl<'a, T> ProxyEvent<'a, T> {
    #[must_use]
    pub fn new(
        edc: &'a EventDataControl<'a>,
        samples: &'a SamplePool<T>,
        tls: &'a TransactionLogSet,
        subscription: &'a SubscriptionControl,
        tracing: &'a dyn TracingHook,
        max_sample_count: u32,
    ) -> Self {
        Self {
            edc,
            samples,
            tls,
            subscription,
            tracing,
            proxy_idx: Cell::new(None),
            last_seen_ts: Cell::new(T_INVALID),
            max_sample_count,
        }
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.proxy_idx.get().is_some()
    }

    /// This proxy's transaction log index, for diagnostics and for tests
    /// driving the underlying `EventDataControl`/`SlotCollector` directly
    /// alongside the façade.
    #[must_use]
    pub fn proxy_index(&self) -> Option<usize> {
        self.proxy_idx.get()
    }

    /// Subscribe, admitting this proxy against the event's sample and
    /// subscriber budget and registering a transaction log slot for it
    /// (spec §4.7, §4.3).
    pub fn subscribe(&self, owner_pid: u32) -> std::result::Result<(), ComErrc> {
        if self.is_subscribed() {
            return Ok(());
        }
        self.subscription.accept(self.max_sample_count).map_err(|err| {
            log::error!("lola: Subscribe rejected: {err}");
            ComErrc::from(err)
        })?;
        let idx = self.tls.register_proxy(owner_pid).map_err(|err| {
            self.subscription.release(self.max_sample_count);
            log::error!("lola: Subscribe failed to register transaction log: {err}");
            ComErrc::from(err)
        })?;
        self.proxy_idx.set(Some(idx));
        self.last_seen_ts.set(T_INVALID);
        self.tracing.on_subscribe(idx);
        Ok(())
    }

    /// Unsubscribe, returning the subscriber-count/sample budget and
    /// freeing the transaction log slot (spec §8 R-2).
    pub fn unsubscribe(&self) -> std::result::Result<(), ComErrc> {
        let Some(idx) = self.proxy_idx.take() else {
            return Ok(());
        };
        self.tls.unregister_proxy(idx).map_err(ComErrc::from)?;
        self.subscription.release(self.max_sample_count);
        self.tracing.on_unsubscribe(idx);
        Ok(())
    }

    /// Number of published samples newer than this proxy's high-water
    /// mark (spec §4.2.3 `GetNumNewSamplesAvailable`).
    #[must_use]
    pub fn get_num_new_samples(&self) -> usize {
        self.edc.get_num_new_events(self.last_seen_ts.get())
    }

    /// Reference and hand each new sample to `callback` in publication
    /// order, up to `max_count`, dereferencing immediately after the
    /// callback returns — mirroring `ara::com`'s synchronous
    /// `GetNewSamples` (spec §4.2.4/§4.2.5). Returns the number of samples
    /// delivered.
    pub fn get_new_samples(
        &self,
        mut callback: impl FnMut(&T),
        max_count: usize,
    ) -> std::result::Result<usize, ComErrc> {
        let Some(proxy_idx) = self.proxy_idx.get() else {
            log::error!("lola: GetNewSamples called on an unsubscribed proxy");
            return Err(ComErrc::kNotOffered);
        };

        let mut delivered = 0;
        while delivered < max_count {
            let slot = self
                .edc
                .reference_next_event(proxy_idx, self.last_seen_ts.get(), T_MAX)
                .map_err(ComErrc::from)?;
            let Some(slot) = slot else {
                break;
            };

            self.tracing.on_reference(proxy_idx, slot);
            self.last_seen_ts.set(self.edc.slot_timestamp(slot));
            // SAFETY: the reference we just took guarantees the publisher
            // cannot recycle this slot until we dereference it below.
            callback(unsafe { &*self.samples.cell(slot).get() });
            self.edc.dereference(proxy_idx, slot).map_err(ComErrc::from)?;
            self.tracing.on_dereference(proxy_idx, slot);
            delivered += 1;
        }
        Ok(delivered)
    }
}
