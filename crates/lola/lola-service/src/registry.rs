//! Process-local discovery registry.
//!
//! A real deployment discovers a service instance's shared-memory segments
//! by mapping files a second process created. Since every test and demo in
//! this workspace runs in a single process, this registry stands in for
//! that cross-process attach step: a skeleton registers its
//! [`SharedInstance`] under the service/instance id pair it offers, and a
//! proxy looks the same pair up instead of mapping files of its own. The
//! segment files themselves are still created with the exact names,
//! permissions, and sizes a real deployment would use (see
//! [`crate::segment`]) — only the final "open this fd in another process"
//! step is elided.

use crate::service_data::{ServiceDataControl, ServiceDataStorage};
use lola_shm::MmapFileMut;
use lola_types::{InstanceId, QualityLevel, ServiceId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Everything a proxy needs in order to attach to an offered service
/// instance: the control/storage registries and the mapped data segment.
///
/// The data segment's mapping is owned here, inside the `Arc` every proxy
/// and sample reference shares, rather than by the `Skeleton` that created
/// it. A real deployment has each process map the file independently, so
/// a producer process exiting does not unmap a consumer's own view of it;
/// this workspace's single-process registry (see the module doc above)
/// reproduces that independence by keeping the mapping alive for as long
/// as anything — skeleton, proxy, or an outstanding `SampleRef` — still
/// references this `SharedInstance`, even after the offering `Skeleton`
/// itself has been dropped without calling `stop_offer`.
pub struct SharedInstance {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub quality_level: QualityLevel,
    pub control: ServiceDataControl,
    pub storage: ServiceDataStorage,
    data_segment: Mutex<MmapFileMut>,
}

impl SharedInstance {
    pub fn new(
        service_id: ServiceId,
        instance_id: InstanceId,
        quality_level: QualityLevel,
        control: ServiceDataControl,
        storage: ServiceDataStorage,
        data_segment: MmapFileMut,
    ) -> Self {
        Self {
            service_id,
            instance_id,
            quality_level,
            control,
            storage,
            data_segment: Mutex::new(data_segment),
        }
    }

    /// Base address of the mapped data segment in this process. Stable for
    /// the lifetime of `self`: the mapping is never replaced or unmapped
    /// before this `SharedInstance`'s last `Arc` is dropped.
    pub fn data_ptr(&self) -> *mut u8 {
        self.data_segment.lock().unwrap().as_mut_ptr()
    }
}

type InstanceKey = (u16, u16);

fn registry() -> &'static Mutex<HashMap<InstanceKey, Arc<SharedInstance>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<InstanceKey, Arc<SharedInstance>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn key(service_id: ServiceId, instance_id: InstanceId) -> InstanceKey {
    (service_id.0, instance_id.0)
}

/// Publishes `instance` so subsequent `lookup_instance` calls for the same
/// (service, instance) id pair can find it.
pub fn register_instance(instance: Arc<SharedInstance>) {
    let k = key(instance.service_id, instance.instance_id);
    registry().lock().unwrap().insert(k, instance);
}

/// Looks up a previously registered instance.
pub fn lookup_instance(service_id: ServiceId, instance_id: InstanceId) -> Option<Arc<SharedInstance>> {
    registry().lock().unwrap().get(&key(service_id, instance_id)).cloned()
}

/// Removes an instance from the registry, e.g. once `stop_offer` has
/// unlinked its segments.
pub fn unregister_instance(service_id: ServiceId, instance_id: InstanceId) {
    registry().lock().unwrap().remove(&key(service_id, instance_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_round_trips() {
        let path = std::env::temp_dir()
            .join(format!("lola_registry_test_{}", std::process::id()));
        let segment = MmapFileMut::create_rw(&path, 64, 0o600).unwrap();

        let instance = Arc::new(SharedInstance::new(
            ServiceId(55),
            InstanceId(1),
            QualityLevel::Qm,
            ServiceDataControl::new(),
            ServiceDataStorage::new(),
            segment,
        ));
        register_instance(Arc::clone(&instance));
        let found = lookup_instance(ServiceId(55), InstanceId(1)).unwrap();
        assert!(Arc::ptr_eq(&instance, &found));
        unregister_instance(ServiceId(55), InstanceId(1));
        assert!(lookup_instance(ServiceId(55), InstanceId(1)).is_none());

        let _ = std::fs::remove_file(&path);
    }
}
