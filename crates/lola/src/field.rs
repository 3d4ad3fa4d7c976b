// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Skeleton/Proxy Field façades: an event plus the last-known-value
//! caching `ara::com` Fields add on top (spec §3 "supplemented
//! features").
//!
//! Grounded on `original_source/.../skeleton_field.h` and
//! `proxy_field_test.cpp`: a Field is an Event with `Update`/`GetValue`
//! instead of `Send`/`GetNewSamples`, and a proxy that has never received
//! a value reports `ComErrc::kFieldValueIsNotValid` rather than an empty
//! result — fields model "always has *a* value once offered", so reading
//! before the first value arrives is a distinct error, not an empty
//! collection.

use crate::error::ComErrc;
use crate::facade::{ProxyEvent, SkeletonEvent};
use std::cell::Cell;

/// Skeleton-side Field: an event that also remembers its last published
/// value, so `GetValue` doesn't require a reader to track it separately.
pub struct SkeletonField<'a, T: Copy> {
    event: SkeletonEvent<'a, T>,
    current: Cell<Option<T>>,
}

impl<'a, T: Copy> SkeletonField<'a, T> {
    #[must_use]
    pub fn new(event: SkeletonEvent<'a, T>) -> Self {
        Self {
            event,
            current: Cell::new(None),
        }
    }

    pub fn offer(&self) {
        self.event.offer();
        self.current.set(None);
    }

    pub fn stop_offer(&self) {
        self.event.stop_offer();
    }

    /// Publish a new field value, also updating the cached current value
    /// (spec §3 Field semantics `Update`).
    pub fn update(&self, value: T) -> std::result::Result<(), ComErrc> {
        self.event.send(value)?;
        self.current.set(Some(value));
        Ok(())
    }

    /// The last value published through this field, if any
    /// (`ComErrc::kFieldValueIsNotValid` before the first `update`).
    pub fn get_value(&self) -> std::result::Result<T, ComErrc> {
        self.current.get().ok_or(ComErrc::kFieldValueIsNotValid)
    }
}

/// Proxy-side Field: an event reader that caches the most recently
/// observed value so repeated `GetValue` calls don't need a fresh sample
/// each time.
pub struct ProxyField<'a, T: Copy> {
    event: ProxyEvent<'a, T>,
    cached: Cell<Option<T>>,
}

impl<'a, T: Copy> ProxyField<'a, T> {
    #[must_use]
    pub fn new(event: ProxyEvent<'a, T>) -> Self {
        Self {
            event,
            cached: Cell::new(None),
        }
    }

    pub fn subscribe(&self, owner_pid: u32) -> std::result::Result<(), ComErrc> {
        self.event.subscribe(owner_pid)?;
        self.cached.set(None);
        Ok(())
    }

    pub fn unsubscribe(&self) -> std::result::Result<(), ComErrc> {
        self.cached.set(None);
        self.event.unsubscribe()
    }

    /// Drain any samples published since the last call, keeping only the
    /// most recent as the cached current value (a Field only ever
    /// exposes "the current value", never a backlog).
    fn sync(&self) -> std::result::Result<(), ComErrc> {
        let cached = &self.cached;
        self.event.get_new_samples(
            |value| cached.set(Some(*value)),
            self.event.get_num_new_samples().max(1),
        )?;
        Ok(())
    }

    /// The field's current value, fetching any pending update first.
    /// `ComErrc::kFieldValueIsNotValid` if nothing has ever been
    /// published (spec §3 Field semantics `GetValue`).
    pub fn get_value(&self) -> std::result::Result<T, ComErrc> {
        self.sync()?;
        self.cached.get().ok_or(ComErrc::kFieldValueIsNotValid)
    }
}
