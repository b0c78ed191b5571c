//! Producer-side facade: offers a service instance, publishes samples, and
//! tears the instance down again.

use crate::event_layout::EventTypeLayout;
use lola_config::ServiceInstanceManifest;
use lola_messaging::{blocking_sender_factory, Message};
use lola_partial_restart::{ensure_partial_restart_directory, ExistenceMarker, PartialRestartPathBuilder};
use lola_runtime::Runtime;
use lola_service::{
    create_asil_b_control_segment, create_data_segment, create_qm_control_segment,
    register_instance, unlink_segments, unregister_instance, ServiceDataControl,
    ServiceDataStorage, SharedInstance,
};
use lola_shm::{MmapFileMut, ShmArena};
use lola_types::{ElementFqId, EventId, InstanceId, LolaError, QualityLevel, ServiceId};
use std::collections::{HashMap, HashSet};
use std::mem::size_of;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Control segment slot state word size, used only to give the literal
/// on-disk control segment a deterministic, plausible byte size (the live
/// slot state words themselves live in process memory; see `lola-event`).
const SLOT_STATE_WORD_BYTES: usize = size_of::<u64>();
/// Per-subscriber transaction log bytes (one begin bit and one end bit per
/// slot, plus a claimed flag), used the same way.
const TRANSACTION_LOG_BOOL_BYTES: usize = 1;

/// Default depth of the in-process sender stand-in used to notify
/// subscribers, matching the deployment default send queue size.
const DEFAULT_SEND_QUEUE_SIZE: usize = 20;

/// A service instance this process is offering. Bundles the existence
/// marker, the backing segments, and the in-process control/storage
/// registries that implement the actual slot allocation protocol.
pub struct Skeleton {
    service_id: ServiceId,
    instance_id: InstanceId,
    quality_level: QualityLevel,
    _existence_marker: ExistenceMarker,
    _qm_control_segment: MmapFileMut,
    _asil_b_control_segment: Option<MmapFileMut>,
    shared: Arc<SharedInstance>,
    subscribers: Mutex<HashMap<EventId, HashSet<u32>>>,
}

impl Skeleton {
    /// Runs the full `offer_service` sequence: acquire the existence
    /// marker, size and create the shared segments, and register every
    /// event named in the manifest against its caller-supplied type
    /// layout.
    pub fn offer_service(
        manifest: &ServiceInstanceManifest,
        event_layouts: &HashMap<EventId, EventTypeLayout>,
    ) -> Result<Skeleton, LolaError> {
        let service_id = manifest.service_type.service_id;
        let instance_id = manifest.instance.instance_id;
        let quality_level = manifest.global.quality_level;
        let strict = manifest.instance.strict;

        let path_builder = PartialRestartPathBuilder::new(service_id);
        ensure_partial_restart_directory(&path_builder)
            .map_err(|e| LolaError::BindingFailure(e.to_string()))?;
        let existence_path = path_builder.existence_marker_path(instance_id);
        let existence_marker = ExistenceMarker::acquire(&existence_path).map_err(|e| {
            warn!(service_id = %service_id, instance_id = %instance_id, "duplicate producer");
            LolaError::BindingFailure(format!("duplicate producer: {e}"))
        })?;

        let mut data_arena = ShmArena::dry_run();
        let mut control_arena = ShmArena::dry_run();
        let mut storage = ServiceDataStorage::new();
        let mut control = ServiceDataControl::new();

        for (name, event_id) in &manifest.service_type.events {
            let deployment = manifest
                .instance
                .events
                .get(name)
                .ok_or_else(|| LolaError::InvalidConfiguration(format!("no deployment for event '{name}'")))?;
            let layout = event_layouts
                .get(event_id)
                .ok_or_else(|| LolaError::InvalidConfiguration(format!("no type layout for event '{name}'")))?;

            storage.register_event(
                *event_id,
                layout.size_of,
                layout.align_of,
                deployment.number_of_sample_slots,
                layout.fingerprint,
                &mut data_arena,
            );
            control.register_event(
                *event_id,
                deployment.number_of_sample_slots,
                deployment.max_subscribers,
                deployment.max_concurrent_allocations,
                deployment.enforce_max_samples,
            );

            let log_set_bytes = deployment.number_of_sample_slots
                * (deployment.max_subscribers + 1)
                * (2 * TRANSACTION_LOG_BOOL_BYTES);
            let slots_bytes = deployment.number_of_sample_slots * SLOT_STATE_WORD_BYTES;
            control_arena.alloc_bytes(slots_bytes + log_set_bytes, 8);
        }

        let data_bytes = data_arena.used() as u64;
        let control_bytes = control_arena.used() as u64;

        let data_segment = create_data_segment(service_id, instance_id, data_bytes)
            .map_err(|e| LolaError::BindingFailure(e.to_string()))?;
        let qm_control_segment =
            create_qm_control_segment(service_id, instance_id, control_bytes, strict)
                .map_err(|e| LolaError::BindingFailure(e.to_string()))?;
        let asil_b_control_segment = if quality_level == QualityLevel::AsilB {
            Some(
                create_asil_b_control_segment(service_id, instance_id, control_bytes, strict)
                    .map_err(|e| LolaError::BindingFailure(e.to_string()))?,
            )
        } else {
            None
        };

        info!(%service_id, %instance_id, ?quality_level, data_bytes, control_bytes, "offered service instance");

        // The data segment's mapping moves into `shared` rather than
        // staying a `Skeleton` field: proxies and sample references hold
        // `shared` directly, so the mapping outlives this `Skeleton` even
        // if it is dropped without `stop_offer` (see `SharedInstance`'s
        // doc comment).
        let shared = Arc::new(SharedInstance::new(
            service_id,
            instance_id,
            quality_level,
            control,
            storage,
            data_segment,
        ));
        register_instance(Arc::clone(&shared));

        Ok(Skeleton {
            service_id,
            instance_id,
            quality_level,
            _existence_marker: existence_marker,
            _qm_control_segment: qm_control_segment,
            _asil_b_control_segment: asil_b_control_segment,
            shared,
            subscribers: Mutex::new(HashMap::new()),
        })
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn quality_level(&self) -> QualityLevel {
        self.quality_level
    }

    /// Records that `subscriber_pid` wants updates for `event_id`. Called
    /// when a `Subscribe` control message arrives from a proxy.
    pub fn handle_subscribe(&self, event_id: EventId, subscriber_pid: u32) {
        self.subscribers.lock().unwrap().entry(event_id).or_default().insert(subscriber_pid);
    }

    pub fn handle_unsubscribe(&self, event_id: EventId, subscriber_pid: u32) {
        if let Some(peers) = self.subscribers.lock().unwrap().get_mut(&event_id) {
            peers.remove(&subscriber_pid);
        }
    }

    /// Allocates a slot, writes `value` into it, publishes a fresh
    /// timestamp, and notifies every currently subscribed peer.
    pub fn send<T: Copy>(&self, event_id: EventId, value: T) -> Result<(), LolaError> {
        let meta = self.shared.storage.get(event_id)?;
        if size_of::<T>() != meta.size_of_slot {
            return Err(LolaError::InvalidConfiguration(format!(
                "event type size {} does not match registered layout {}",
                size_of::<T>(),
                meta.size_of_slot
            )));
        }
        let control = self.shared.control.get(event_id)?;

        let index = control.allocate_slot()?;
        // SAFETY: `index < meta.num_slots` (guaranteed by `allocate_slot`),
        // the region at `data_offset + index * size_of_slot` belongs solely
        // to this event's slot array, and the slot protocol guarantees no
        // other writer touches this index concurrently.
        unsafe {
            let ptr =
                self.shared.data_ptr().add(meta.data_offset as usize + index * meta.size_of_slot) as *mut T;
            ptr.write(value);
        }
        let timestamp = control.next_timestamp();
        control.publish_slot(index, timestamp);

        self.notify_subscribers(event_id);
        Ok(())
    }

    fn notify_subscribers(&self, event_id: EventId) {
        let peers: Vec<u32> = self
            .subscribers
            .lock()
            .unwrap()
            .get(&event_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        if peers.is_empty() {
            return;
        }
        let event = ElementFqId::new(self.service_id, self.instance_id, event_id);
        let runtime = Runtime::get();
        for peer_pid in peers {
            let sender = runtime.messaging().get_sender(
                QualityLevel::Qm,
                peer_pid,
                blocking_sender_factory(DEFAULT_SEND_QUEUE_SIZE),
            );
            if sender.send(Message::EventUpdated { event }).is_err() {
                warn!(peer_pid, ?event_id, "failed to notify subscriber of event update");
            }
        }
    }

    /// Unlinks every backing segment, provided no subscriber still holds a
    /// reference to any slot of any event. Consumes `self`: the existence
    /// marker is released as part of the drop that follows.
    pub fn stop_offer(self) -> Result<(), LolaError> {
        for event_id in self.shared.control.event_ids() {
            let control = self.shared.control.get(*event_id)?;
            for slot in 0..control.num_slots() {
                if control.slot_reference_count(slot) != 0 {
                    return Err(LolaError::SegmentsStillReferenced);
                }
            }
        }
        unlink_segments(
            self.service_id,
            self.instance_id,
            self._asil_b_control_segment.is_some(),
        )
        .map_err(|e| LolaError::BindingFailure(e.to_string()))?;
        unregister_instance(self.service_id, self.instance_id);
        info!(service_id = %self.service_id, instance_id = %self.instance_id, "stopped offering service instance");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lola_config::{
        EventInstanceDeployment, GlobalConfig, InstanceDeployment, ServiceInstanceManifest,
        ServiceTypeDeployment, ShmSizeCalcMode, EXPECTED_SERIALIZATION_VERSION,
    };
    use std::collections::HashMap;

    fn manifest(service_id: u16, instance_id: u16) -> ServiceInstanceManifest {
        let mut events = HashMap::new();
        events.insert("speed".to_string(), EventId(1));

        let mut instance_events = HashMap::new();
        instance_events.insert(
            "speed".to_string(),
            EventInstanceDeployment {
                number_of_sample_slots: 4,
                max_subscribers: 4,
                max_concurrent_allocations: 1,
                enforce_max_samples: true,
            },
        );

        ServiceInstanceManifest {
            service_type: ServiceTypeDeployment {
                service_id: ServiceId(service_id),
                events,
                fields: HashMap::new(),
            },
            instance: InstanceDeployment {
                serialization_version: EXPECTED_SERIALIZATION_VERSION,
                instance_id: InstanceId(instance_id),
                shared_memory_size: None,
                events: instance_events,
                fields: HashMap::new(),
                strict: false,
                allowed_consumer: HashMap::new(),
                allowed_provider: HashMap::new(),
            },
            global: GlobalConfig {
                quality_level: QualityLevel::Qm,
                receive_queue_size: 10,
                send_queue_size: 20,
                shm_size_calc_mode: ShmSizeCalcMode::Estimation,
            },
        }
    }

    #[test]
    fn offer_send_and_stop_offer_round_trip() {
        let manifest = manifest(0x9001, 1);
        let mut layouts = HashMap::new();
        layouts.insert(EventId(1), EventTypeLayout::of::<u32>());

        let skeleton = Skeleton::offer_service(&manifest, &layouts).unwrap();
        skeleton.send(EventId(1), 42u32).unwrap();
        skeleton.send(EventId(1), 43u32).unwrap();

        // no subscribers ever acquired a reference, so every slot's
        // refcount is zero and stop_offer must succeed.
        assert!(skeleton.stop_offer().is_ok());
    }

    #[test]
    fn send_with_mismatched_type_size_is_rejected() {
        let manifest = manifest(0x9002, 2);
        let mut layouts = HashMap::new();
        layouts.insert(EventId(1), EventTypeLayout::of::<u32>());
        let skeleton = Skeleton::offer_service(&manifest, &layouts).unwrap();

        let result = skeleton.send(EventId(1), 42u64);
        assert!(matches!(result, Err(LolaError::InvalidConfiguration(_))));
        let _ = skeleton.stop_offer();
    }

    #[test]
    fn duplicate_offer_of_same_instance_fails() {
        let manifest = manifest(0x9003, 3);
        let mut layouts = HashMap::new();
        layouts.insert(EventId(1), EventTypeLayout::of::<u32>());

        let first = Skeleton::offer_service(&manifest, &layouts).unwrap();
        let second = Skeleton::offer_service(&manifest, &layouts);
        assert!(second.is_err());
        let _ = first.stop_offer();
    }
}
