//! A held reference to one acquired sample. Dropping it releases the slot
//! reference it represents (spec §4.2's release path) automatically.

use lola_service::SharedInstance;
use std::sync::Arc;
use tracing::trace;

use lola_types::EventId;

/// An acquired sample, valid until dropped. Derefs to `&T`; releases its
/// slot reference on drop.
pub struct SampleRef<T: Copy> {
    shared: Arc<SharedInstance>,
    event_id: EventId,
    log_index: usize,
    slot_index: usize,
    pub timestamp: u32,
    value: T,
}

impl<T: Copy> SampleRef<T> {
    pub(crate) fn new(
        shared: Arc<SharedInstance>,
        event_id: EventId,
        log_index: usize,
        slot_index: usize,
        timestamp: u32,
        value: T,
    ) -> Self {
        Self { shared, event_id, log_index, slot_index, timestamp, value }
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T: Copy> std::ops::Deref for SampleRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Copy> Drop for SampleRef<T> {
    fn drop(&mut self) {
        let Ok(control) = self.shared.control.get(self.event_id) else {
            return;
        };
        let log = control.log_set().log(self.log_index);
        control.release_slot(log, self.slot_index);
        trace!(slot = self.slot_index, "released sample reference");
    }
}
