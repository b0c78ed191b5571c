//! Per-service-instance control and storage registries: map an event id to
//! its [`EventDataControl`] (slot state words and transaction logs) and its
//! raw storage placement within the data segment's arena, respectively.
//!
//! Two registries because they live in two different shared-memory
//! segments with different access rules (see [`crate::access_control`]):
//! control is read-write to mixed-criticality consumers, data remains
//! writer-only to everyone but the producer.

use lola_event::EventDataControl;
use lola_shm::ShmArena;
use lola_types::{EventId, LolaError};
use std::collections::HashMap;
use tracing::debug;

/// Where one event's raw slot-array bytes live within the data segment's
/// arena, plus the metadata a consumer needs to reinterpret them.
///
/// `fingerprint` is carried through verbatim from the registering
/// [`crate::segment_path`]-adjacent type layout; it is reserved for future
/// schema-checking and ignored by every consumer in this workspace today.
#[derive(Debug, Clone, Copy)]
pub struct EventStorageMeta {
    pub data_offset: u64,
    pub size_of_slot: usize,
    pub align_of_slot: usize,
    pub num_slots: usize,
    pub fingerprint: u64,
}

impl EventStorageMeta {
    pub fn total_bytes(&self) -> usize {
        self.size_of_slot * self.num_slots
    }
}

/// Maps event id -> control structure for every event a service instance
/// offers. One instance per offered service; populated during `offer`.
#[derive(Default)]
pub struct ServiceDataControl {
    controls: HashMap<EventId, EventDataControl>,
}

impl ServiceDataControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_event(
        &mut self,
        event_id: EventId,
        num_slots: usize,
        max_subscribers: usize,
        max_concurrent_allocations: usize,
        enforce_max_samples: bool,
    ) -> &EventDataControl {
        debug!(?event_id, num_slots, max_subscribers, "registering event data control");
        let control = EventDataControl::new(
            num_slots,
            max_subscribers,
            max_concurrent_allocations,
            enforce_max_samples,
        );
        self.controls.insert(event_id, control);
        self.controls.get(&event_id).expect("just inserted")
    }

    pub fn get(&self, event_id: EventId) -> Result<&EventDataControl, LolaError> {
        self.controls.get(&event_id).ok_or(LolaError::InvalidHandle)
    }

    pub fn event_ids(&self) -> impl Iterator<Item = &EventId> {
        self.controls.keys()
    }
}

/// Maps event id -> raw storage placement for every event a service
/// instance offers. Built by laying out each event's slot array in turn
/// inside a shared [`ShmArena`] (the data segment).
#[derive(Default)]
pub struct ServiceDataStorage {
    layouts: HashMap<EventId, EventStorageMeta>,
}

impl ServiceDataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_event(
        &mut self,
        event_id: EventId,
        size_of_slot: usize,
        align_of_slot: usize,
        num_slots: usize,
        fingerprint: u64,
        arena: &mut ShmArena,
    ) -> EventStorageMeta {
        let data_offset = arena.alloc_bytes(size_of_slot * num_slots, align_of_slot);
        let meta = EventStorageMeta { data_offset, size_of_slot, align_of_slot, num_slots, fingerprint };
        debug!(?event_id, data_offset, bytes = meta.total_bytes(), "laid out event storage");
        self.layouts.insert(event_id, meta);
        meta
    }

    pub fn get(&self, event_id: EventId) -> Result<EventStorageMeta, LolaError> {
        self.layouts.get(&event_id).copied().ok_or(LolaError::InvalidHandle)
    }
}
