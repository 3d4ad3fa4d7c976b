// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Already-parsed deployment configuration for one event or field.
//!
//! Parsing a deployment manifest (JSON, a model file, whatever the host
//! integration uses) is explicitly out of scope (spec Non-goals); this
//! module only defines the in-memory shape a host hands the core after
//! parsing, mirroring how `transport::shm::policy::ShmPolicy` is consumed
//! as an already-resolved enum rather than parsed inline from config.

use crate::subscription::SubscriptionConfig;

/// ASIL criticality tagging for an event, driving whether
/// `composite::EventDataControlComposite` constructs an ASIL-rated side
/// (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Quality-managed only; no ASIL control region.
    Qm,
    /// Dual QM + ASIL publication with the "safety wins" disconnect
    /// policy.
    AsilB,
}

/// Resolved, already-validated configuration for one event (or field,
/// which reuses the same shape — see `field.rs`).
#[derive(Debug, Clone, Copy)]
pub struct EventConfig {
    /// Numeric service identifier this event belongs to.
    pub service_id: u16,
    /// Instance identifier of the service deployment.
    pub instance_id: u16,
    /// Element identifier within the service interface.
    pub element_id: u32,
    /// Number of publication slots (`spec.md` §4.2, `max_samples`
    /// deployment parameter).
    pub slot_count: usize,
    pub criticality: Criticality,
    pub subscription: SubscriptionConfig,
}

impl EventConfig {
    #[must_use]
    pub fn is_asil(&self) -> bool {
        matches!(self.criticality, Criticality::AsilB)
    }
}
