// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory arena layout: offset-based addressing over an
//! already-mapped region.
//!
//! The core never maps or creates shared memory itself (that primitive is
//! an explicit Non-goal — a host process provides an already-mapped
//! region and the core only ever computes byte offsets into it, the same
//! way `transport::shm::ring::ring_segment_size` computes a size without
//! owning the `mmap` call). [`MappedRegion`] is the seam: production code
//! hands the core a view over real POSIX shared memory (or any other
//! already-mapped buffer); [`HeapRegion`] is provided for single-process
//! testing and embedding.

use crate::error::{LolaError, Result};
use crate::event_data_control::EventDataControl;
use crate::slot_word::SlotWord;
use crate::subscription::{SubscriptionConfig, SubscriptionControl};
use crate::transaction_log::TransactionLogSet;
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU32, Ordering};

/// A region of memory the core can address by offset. Implementors must
/// guarantee the pointer stays valid and stable for the lifetime of the
/// `MappedRegion` value (no reallocation, no moving).
///
/// # Safety
///
/// `as_ptr()` must return a pointer to at least `len()` valid, writable
/// bytes for the entire lifetime of `&self`.
pub unsafe trait MappedRegion: Send + Sync {
    fn as_ptr(&self) -> *mut u8;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A boxed byte buffer standing in for an already-mapped region.
///
/// This is *not* a POSIX shared-memory object — it cannot be shared across
/// a process boundary. It exists for tests and for single-process
/// embedding where a caller already owns appropriately-allocated memory
/// and just wants the arena's offset arithmetic. Zero-initialized on
/// construction, mirroring `transport::shm::segment::ShmSegment::create`'s
/// zero-fill discipline (minus the `shm_open`/`mmap` calls themselves,
/// which are out of scope for this crate).
pub struct HeapRegion {
    buf: Box<[u8]>,
}

impl HeapRegion {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size].into_boxed_slice(),
        }
    }
}

// SAFETY: `buf` is a heap allocation owned exclusively by this
// `HeapRegion`; it is never reallocated or moved after construction
// (Box<[u8]> is stable), so the pointer returned by as_ptr() remains
// valid for the lifetime of `&self`.
unsafe impl MappedRegion for HeapRegion {
    fn as_ptr(&self) -> *mut u8 {
        self.buf.as_ptr() as *mut u8
    }

    fn len(&self) -> usize {
        self.buf.len()
    }
}

/// Fully-qualified service-element identifier, packed 64-bit little-endian
/// per `spec.md` §6: bits 0..15 = service_id, 16..31 = instance_id,
/// 32..55 = element_id, 56..63 = element_type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementFqId {
    pub service_id: u16,
    pub instance_id: u16,
    pub element_id: u32, // only the low 24 bits are significant
    pub element_type: ElementType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    Event = 0,
    Field = 1,
    Method = 2,
}

impl ElementType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Event),
            1 => Some(Self::Field),
            2 => Some(Self::Method),
            _ => None,
        }
    }
}

impl ElementFqId {
    #[must_use]
    pub fn new(service_id: u16, instance_id: u16, element_id: u32, element_type: ElementType) -> Self {
        debug_assert!(element_id <= 0x00FF_FFFF, "element_id exceeds 24 bits");
        Self {
            service_id,
            instance_id,
            element_id: element_id & 0x00FF_FFFF,
            element_type,
        }
    }

    /// Pack into the bit-exact 64-bit representation.
    #[must_use]
    pub fn to_packed(self) -> u64 {
        u64::from(self.service_id)
            | (u64::from(self.instance_id) << 16)
            | (u64::from(self.element_id & 0x00FF_FFFF) << 32)
            | ((self.element_type as u64) << 56)
    }

    #[must_use]
    pub fn from_packed(raw: u64) -> Option<Self> {
        let service_id = (raw & 0xFFFF) as u16;
        let instance_id = ((raw >> 16) & 0xFFFF) as u16;
        let element_id = ((raw >> 32) & 0x00FF_FFFF) as u32;
        let element_type = ElementType::from_u8(((raw >> 56) & 0xFF) as u8)?;
        Some(Self {
            service_id,
            instance_id,
            element_id,
            element_type,
        })
    }
}

/// Generate the bit-exact shared-memory object name for the data region of
/// an event, per `spec.md` §6: `lola-data-<service_id:016x>-<instance_id:05d>`.
#[must_use]
pub fn data_segment_name(service_id: u64, instance_id: u16) -> String {
    format!("lola-data-{service_id:016x}-{instance_id:05}")
}

/// QM control region name: `lola-ctl-<service_id:016x>-<instance_id:05d>`.
#[must_use]
pub fn qm_control_segment_name(service_id: u64, instance_id: u16) -> String {
    format!("lola-ctl-{service_id:016x}-{instance_id:05}")
}

/// ASIL control region name: the QM name with a `-b` suffix.
#[must_use]
pub fn asil_control_segment_name(service_id: u64, instance_id: u16) -> String {
    format!("{}-b", qm_control_segment_name(service_id, instance_id))
}

/// Control-region header, located at offset 0 of every control arena.
///
/// Cache-aligned for the same false-sharing reasons as
/// `transport::shm::slot::ShmControl`, even though this header is touched
/// far less often than a slot word.
#[repr(C, align(64))]
pub struct ArenaHeader {
    magic: AtomicU32,
    version: AtomicU32,
    /// PID of the publisher that owns this control region, used by the
    /// Slot Collector's liveness check at startup (spec §4.5 point iii).
    pub skeleton_pid: AtomicU32,
    _pad: [u8; 52],
}

impl ArenaHeader {
    pub const MAGIC: u32 = 0x4C4F_4C41; // "LOLA"
    pub const VERSION: u32 = 1;

    #[must_use]
    pub fn new(skeleton_pid: u32) -> Self {
        Self {
            magic: AtomicU32::new(Self::MAGIC),
            version: AtomicU32::new(Self::VERSION),
            skeleton_pid: AtomicU32::new(skeleton_pid),
            _pad: [0u8; 52],
        }
    }

    /// Validate this header's magic/version and refuse to attach on
    /// mismatch, mapping to `LolaError::AbiMismatch` (spec §7).
    pub fn validate(&self) -> Result<()> {
        let magic = self.magic.load(Ordering::Acquire);
        let version = self.version.load(Ordering::Acquire);
        if magic != Self::MAGIC {
            return Err(LolaError::AbiMismatch {
                expected: Self::MAGIC,
                found: magic,
            });
        }
        if version != Self::VERSION {
            return Err(LolaError::AbiMismatch {
                expected: Self::VERSION,
                found: version,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn skeleton_pid(&self) -> u32 {
        self.skeleton_pid.load(Ordering::Acquire)
    }
}

#[must_use]
fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Location and size of one event's control record within the control
/// region (spec §4.6 `event_controls_` map entry). Every field is a byte
/// offset from the region's base, computed once by
/// [`ArenaLayout::reserve`] and stable for the lifetime of the layout, so
/// two independently-mapped processes that agree on the same sequence of
/// `reserve` calls agree on every address.
#[derive(Debug, Clone, Copy)]
pub struct EventControlOffset {
    slots_offset: usize,
    slot_count: usize,
    subscription_offset: usize,
    tls_offset: usize,
}

impl EventControlOffset {
    fn end(&self) -> usize {
        self.tls_offset + size_of::<TransactionLogSet>()
    }
}

/// Typed views into one event's control record, computed from a
/// [`MappedRegion`]'s raw pointer plus an [`EventControlOffset`] (spec
/// §4.6: "`event_controls_` map from `ElementFqId` -> { EDC,
/// SubscriptionControl, TLS }").
pub struct EventControlView<'a> {
    slots: &'a [SlotWord],
    subscription: &'a SubscriptionControl,
    tls: &'a TransactionLogSet,
}

impl<'a> EventControlView<'a> {
    #[must_use]
    pub fn slots(&self) -> &'a [SlotWord] {
        self.slots
    }

    #[must_use]
    pub fn subscription_control(&self) -> &'a SubscriptionControl {
        self.subscription
    }

    #[must_use]
    pub fn transaction_log_set(&self) -> &'a TransactionLogSet {
        self.tls
    }

    /// Build the `EventDataControl` this event's façade drives, borrowing
    /// straight from the mapped region.
    #[must_use]
    pub fn event_data_control(&self) -> EventDataControl<'a> {
        EventDataControl::new(self.slots, self.tls)
    }
}

/// Maps every event of one service instance to its
/// [`EventControlOffset`] within an already-mapped control region, the
/// offset-based `event_controls_` table spec §4.6 describes.
///
/// Grounded on `transport::shm::ring::ring_segment_size`'s own
/// offset/size bookkeeping (there: header plus a bounded ring buffer;
/// here: header plus a variable number of variably-sized per-event
/// records) and on `segment.rs`'s raw-pointer-construction style —
/// including its discipline of a documented `SAFETY` comment on every
/// unsafe block rather than hiding the cast behind a generic deref.
///
/// `reserve` is deterministic given the same sequence of calls, so a
/// publisher and its subscribers build an identical `ArenaLayout` from
/// the same static event list without ever writing the layout itself into
/// shared memory.
pub struct ArenaLayout {
    events: HashMap<u64, EventControlOffset>,
    next_offset: usize,
}

impl ArenaLayout {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: HashMap::new(),
            next_offset: size_of::<ArenaHeader>(),
        }
    }

    /// Reserve `slot_count` state slots plus one `SubscriptionControl` and
    /// one `TransactionLogSet` for `id`, placed contiguously starting at
    /// the next naturally-aligned offset after whatever was reserved
    /// before it. Returns the offset record, also retrievable later via
    /// `offset_of`.
    pub fn reserve(&mut self, id: ElementFqId, slot_count: usize) -> EventControlOffset {
        let slots_offset = align_up(self.next_offset, align_of::<SlotWord>());
        let after_slots = slots_offset + slot_count * size_of::<SlotWord>();

        let subscription_offset = align_up(after_slots, align_of::<SubscriptionControl>());
        let after_subscription = subscription_offset + size_of::<SubscriptionControl>();

        let tls_offset = align_up(after_subscription, align_of::<TransactionLogSet>());

        let offset = EventControlOffset {
            slots_offset,
            slot_count,
            subscription_offset,
            tls_offset,
        };
        self.next_offset = offset.end();
        self.events.insert(id.to_packed(), offset);
        offset
    }

    /// Total control-region size required to hold every record reserved
    /// so far; a host allocating/mapping the real control segment sizes
    /// it to at least this many bytes, the same way
    /// `ring_segment_size` sizes a ring's backing segment.
    #[must_use]
    pub fn required_len(&self) -> usize {
        self.next_offset
    }

    #[must_use]
    pub fn offset_of(&self, id: ElementFqId) -> Option<EventControlOffset> {
        self.events.get(&id.to_packed()).copied()
    }

    fn checked_offset(&self, id: ElementFqId, region_len: usize) -> Result<EventControlOffset> {
        let offset = self.offset_of(id).ok_or(LolaError::UnknownElement)?;
        if offset.end() > region_len {
            return Err(LolaError::ArenaTooSmall {
                required: offset.end(),
                actual: region_len,
            });
        }
        Ok(offset)
    }

    /// Construct `id`'s control record in place over `region`, at the
    /// offset `reserve` assigned it. Called exactly once by the publisher
    /// before any subscriber attaches (spec §4.8 `offer`: "constructs
    /// EDC/TLS").
    ///
    /// # Safety
    /// `region` must be at least `required_len()` bytes; `id` must have
    /// been reserved on this layout; this offset must not already hold a
    /// live `EventControl` record (calling this twice for the same `id`
    /// overwrites in-flight atomics with fresh ones); and no other thread
    /// may observe `region` concurrently with this call, since the writes
    /// below are plain (non-atomic) pointer writes, not stores through the
    /// types' own atomic fields.
    pub unsafe fn init_event_control(
        &self,
        id: ElementFqId,
        region: &dyn MappedRegion,
        config: SubscriptionConfig,
    ) -> Result<()> {
        let offset = self.checked_offset(id, region.len())?;
        let base = region.as_ptr();
        // SAFETY: see function-level SAFETY comment; `offset` was checked
        // to fit within `region.len()` above, and the three sub-regions it
        // names are disjoint and suitably aligned by construction in
        // `reserve`.
        unsafe {
            for i in 0..offset.slot_count {
                let slot_ptr = base
                    .add(offset.slots_offset + i * size_of::<SlotWord>())
                    .cast::<SlotWord>();
                slot_ptr.write(SlotWord::new());
            }
            base.add(offset.subscription_offset)
                .cast::<SubscriptionControl>()
                .write(SubscriptionControl::new(config));
            base.add(offset.tls_offset)
                .cast::<TransactionLogSet>()
                .write(TransactionLogSet::new());
        }
        Ok(())
    }

    /// Borrow `id`'s already-initialized control record from `region`.
    ///
    /// # Safety
    /// `region` must be at least `required_len()` bytes and must already
    /// hold a live `EventControl` record at `id`'s offset — written by a
    /// prior `init_event_control` call on *some* mapping of this same
    /// shared memory object, not necessarily this one.
    pub unsafe fn event_control<'a>(
        &self,
        id: ElementFqId,
        region: &'a dyn MappedRegion,
    ) -> Result<EventControlView<'a>> {
        let offset = self.checked_offset(id, region.len())?;
        let base = region.as_ptr();
        // SAFETY: see function-level SAFETY comment; lifetimes are tied to
        // `'a` (the region's own borrow), and the three views never
        // overlap in memory.
        unsafe {
            let slots = std::slice::from_raw_parts(
                base.add(offset.slots_offset).cast::<SlotWord>(),
                offset.slot_count,
            );
            let subscription = &*base
                .add(offset.subscription_offset)
                .cast::<SubscriptionControl>();
            let tls = &*base.add(offset.tls_offset).cast::<TransactionLogSet>();
            Ok(EventControlView { slots, subscription, tls })
        }
    }
}

impl Default for ArenaLayout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_fq_id_round_trips() {
        let id = ElementFqId::new(7, 42, 0x00AB_CDEF, ElementType::Field);
        let packed = id.to_packed();
        let back = ElementFqId::from_packed(packed).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn segment_names_match_bit_exact_format() {
        assert_eq!(
            data_segment_name(0x0123_4567_89AB_CDEF, 7),
            "lola-data-0123456789abcdef-00007"
        );
        assert_eq!(
            qm_control_segment_name(0, 0),
            "lola-ctl-0000000000000000-00000"
        );
        assert_eq!(
            asil_control_segment_name(0, 0),
            "lola-ctl-0000000000000000-00000-b"
        );
    }

    #[test]
    fn header_validates_fresh_construction() {
        let header = ArenaHeader::new(1234);
        assert!(header.validate().is_ok());
        assert_eq!(header.skeleton_pid(), 1234);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let header = ArenaHeader::new(1);
        header.magic.store(0xDEAD_BEEF, Ordering::Release);
        assert!(matches!(
            header.validate(),
            Err(LolaError::AbiMismatch { .. })
        ));
    }

    #[test]
    fn heap_region_is_zeroed_and_sized() {
        let region = HeapRegion::new(128);
        assert_eq!(region.len(), 128);
        // SAFETY: region owns 128 valid bytes for the scope of this test.
        let slice = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(slice.iter().all(|&b| b == 0));
    }

    #[test]
    fn layout_reserve_keeps_event_records_disjoint() {
        let mut layout = ArenaLayout::new();
        let a = ElementFqId::new(1, 0, 1, ElementType::Event);
        let b = ElementFqId::new(1, 0, 2, ElementType::Event);

        let a_off = layout.reserve(a, 4);
        let b_off = layout.reserve(b, 8);

        assert!(a_off.end() <= b_off.slots_offset);
        assert_eq!(layout.required_len(), b_off.end());
        assert_eq!(layout.offset_of(a).unwrap().slot_count, 4);
    }

    #[test]
    fn event_control_round_trips_through_a_mapped_region() {
        let mut layout = ArenaLayout::new();
        let id = ElementFqId::new(1, 0, 1, ElementType::Event);
        layout.reserve(id, 4);

        let region = HeapRegion::new(layout.required_len());
        // SAFETY: region is sized to required_len() and id was just
        // reserved and never initialized before.
        unsafe {
            layout
                .init_event_control(id, &region, SubscriptionConfig::default())
                .unwrap();
        }

        // SAFETY: the record was just constructed above, over the same
        // region.
        let view = unsafe { layout.event_control(id, &region).unwrap() };
        assert_eq!(view.slots().len(), 4);
        assert_eq!(view.subscription_control().current_subscribers(), 0);

        let edc = view.event_data_control();
        let slot = edc.allocate_next_slot().unwrap();
        edc.event_ready(slot, 1);
        assert_eq!(edc.get_num_new_events(0), 1);
    }

    #[test]
    fn event_control_rejects_a_region_too_small() {
        let mut layout = ArenaLayout::new();
        let id = ElementFqId::new(1, 0, 1, ElementType::Event);
        layout.reserve(id, 4);

        let region = HeapRegion::new(4); // far smaller than required_len()
        // SAFETY: only inspecting the error path; no record is ever
        // written or read when the size check fails first.
        let result = unsafe { layout.event_control(id, &region) };
        assert!(matches!(result, Err(LolaError::ArenaTooSmall { .. })));
    }

    #[test]
    fn offset_of_unknown_element_is_rejected() {
        let layout = ArenaLayout::new();
        let region = HeapRegion::new(64);
        let unknown = ElementFqId::new(9, 9, 9, ElementType::Event);
        // SAFETY: only inspecting the error path.
        let result = unsafe { layout.event_control(unknown, &region) };
        assert!(matches!(result, Err(LolaError::UnknownElement)));
    }
}
