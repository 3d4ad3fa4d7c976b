// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the LoLa core and its facades.
//!
//! Mirrors the shape of `transport::shm::ShmError` in the teacher crate:
//! one variant per cause, a manual `Display` impl, no `thiserror`. The
//! facade-level [`ComErrc`] is a separate, smaller enum that core errors
//! are mapped onto at the `SkeletonEvent`/`ProxyEvent` boundary (see
//! `spec.md` §7).

use std::fmt;

/// Errors raised by the core (slot control, transaction log, composite,
/// collector, arena, subscription admission).
#[derive(Debug)]
pub enum LolaError {
    /// `EventDataControl::allocate_next_slot` found no slot with `R == 0`.
    SlotExhaustion,
    /// The event's monotone timestamp counter reached the reserved
    /// sentinel range; publication must stop until the event is
    /// re-offered (see `DESIGN.md` — timestamp overflow policy).
    TimestampExhausted,
    /// `TransactionLogSet::register_proxy` found no free log slot.
    TracingSlotExhausted,
    /// The composite's ASIL side failed to allocate while QM either
    /// succeeded or was already disconnected — fatal for this publication.
    AsilAllocationFailed,
    /// Control-region magic or version did not match what this binary
    /// expects; refuse to attach rather than interpret a foreign layout.
    AbiMismatch { expected: u32, found: u32 },
    /// A slot index or proxy index was outside the configured bound for
    /// this event.
    IndexOutOfBounds { index: usize, bound: usize },
    /// `SubscriptionControl::accept` would exceed the configured sample
    /// or subscriber budget.
    SubscriptionBudgetExceeded,
    /// `ArenaLayout::offset_of`/`event_control` was asked for an
    /// `ElementFqId` that was never `reserve`d.
    UnknownElement,
    /// A `MappedRegion` is smaller than the `ArenaLayout` it is asked to
    /// address requires.
    ArenaTooSmall { required: usize, actual: usize },
}

impl fmt::Display for LolaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotExhaustion => write!(f, "no free slot available for allocation"),
            Self::TimestampExhausted => {
                write!(f, "event timestamp counter exhausted, re-offer required")
            }
            Self::TracingSlotExhausted => {
                write!(f, "transaction log set has no free proxy slot")
            }
            Self::AsilAllocationFailed => {
                write!(f, "ASIL-rated allocation failed, publication aborted")
            }
            Self::AbiMismatch { expected, found } => {
                write!(
                    f,
                    "control region ABI mismatch: expected magic/version {expected:#x}, found {found:#x}"
                )
            }
            Self::IndexOutOfBounds { index, bound } => {
                write!(f, "index {index} out of bounds (max {bound})")
            }
            Self::SubscriptionBudgetExceeded => {
                write!(f, "subscription would exceed configured sample/subscriber budget")
            }
            Self::UnknownElement => {
                write!(f, "element fq id was never reserved in this arena layout")
            }
            Self::ArenaTooSmall { required, actual } => {
                write!(f, "arena region too small: needs {required} bytes, got {actual}")
            }
        }
    }
}

impl std::error::Error for LolaError {}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, LolaError>;

/// Facade-level error kinds surfaced to generated skeleton/proxy code,
/// mapped from [`LolaError`] (see `spec.md` §6 "Façade-level error
/// kinds").
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComErrc {
    kNotOffered,
    kBindingFailure,
    kSampleAllocationFailure,
    kFieldValueIsNotValid,
    kInvalidBindingInformation,
    kInstanceIDCouldNotBeResolved,
    kFindServiceHandlerFailure,
    kInvalidHandle,
}

impl fmt::Display for ComErrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::kNotOffered => "event has not been offered",
            Self::kBindingFailure => "binding reported a failure",
            Self::kSampleAllocationFailure => "no sample slot available",
            Self::kFieldValueIsNotValid => "field has not been updated yet",
            Self::kInvalidBindingInformation => "invalid binding information",
            Self::kInstanceIDCouldNotBeResolved => "instance id could not be resolved",
            Self::kFindServiceHandlerFailure => "find-service handler failed",
            Self::kInvalidHandle => "invalid handle",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ComErrc {}

impl From<LolaError> for ComErrc {
    fn from(err: LolaError) -> Self {
        match err {
            LolaError::SlotExhaustion => Self::kSampleAllocationFailure,
            LolaError::TimestampExhausted | LolaError::AsilAllocationFailed => {
                Self::kBindingFailure
            }
            LolaError::TracingSlotExhausted => Self::kBindingFailure,
            LolaError::AbiMismatch { .. } => Self::kInvalidBindingInformation,
            LolaError::IndexOutOfBounds { .. } => Self::kInvalidHandle,
            LolaError::SubscriptionBudgetExceeded => Self::kBindingFailure,
            LolaError::UnknownElement | LolaError::ArenaTooSmall { .. } => {
                Self::kInvalidBindingInformation
            }
        }
    }
}
