// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Optional instrumentation seam mirroring the shape of the original
//! binding's tracing headers (`original_source/.../tracing_runtime.h`
//! etc.): a set of default-no-op hooks called around the lifecycle
//! operations that matter for trace correlation — allocate, send,
//! reference, dereference, subscribe. A host wires up a real
//! implementation (e.g. one writing to the skeleton's own transaction log
//! for producer-side reference tracing, spec §4.3 "a special skeleton
//! transaction log").
//!
//! Kept deliberately thin: this crate's scope is the control plane, not a
//! tracing sink. `log::trace!` via `LoggingTracingHook` is provided as the
//! one concrete, dependency-free implementation.

use crate::SlotIndex;

/// Hook points fired around the control plane's lifecycle operations.
/// All methods have a no-op default so implementors only override what
/// they need.
pub trait TracingHook: Send + Sync {
    fn on_allocate(&self, _slot: SlotIndex) {}
    fn on_send(&self, _slot: SlotIndex, _timestamp: u32) {}
    fn on_reference(&self, _proxy_idx: usize, _slot: SlotIndex) {}
    fn on_dereference(&self, _proxy_idx: usize, _slot: SlotIndex) {}
    fn on_subscribe(&self, _proxy_idx: usize) {}
    fn on_unsubscribe(&self, _proxy_idx: usize) {}
}

/// No-op hook, the default for deployments with tracing disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracingHook;

impl TracingHook for NoopTracingHook {}

/// Routes every hook through `log::trace!`, for development builds that
/// want visibility without a real trace sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTracingHook;

impl TracingHook for LoggingTracingHook {
    fn on_allocate(&self, slot: SlotIndex) {
        log::trace!("allocate slot={slot}");
    }

    fn on_send(&self, slot: SlotIndex, timestamp: u32) {
        log::trace!("send slot={slot} timestamp={timestamp}");
    }

    fn on_reference(&self, proxy_idx: usize, slot: SlotIndex) {
        log::trace!("reference proxy={proxy_idx} slot={slot}");
    }

    fn on_dereference(&self, proxy_idx: usize, slot: SlotIndex) {
        log::trace!("dereference proxy={proxy_idx} slot={slot}");
    }

    fn on_subscribe(&self, proxy_idx: usize) {
        log::trace!("subscribe proxy={proxy_idx}");
    }

    fn on_unsubscribe(&self, proxy_idx: usize) {
        log::trace!("unsubscribe proxy={proxy_idx}");
    }
}
