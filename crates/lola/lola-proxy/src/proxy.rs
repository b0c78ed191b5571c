//! Consumer-side facade: attaches to an offered service instance,
//! subscribes to events, and pulls new samples.

use crate::handle::ServiceInstanceHandle;
use crate::sample::SampleRef;
use lola_messaging::{blocking_sender_factory, Message};
use lola_partial_restart::{ensure_partial_restart_directory, PartialRestartPathBuilder, UsageMarker};
use lola_runtime::Runtime;
use lola_service::{lookup_instance, SharedInstance};
use lola_types::{ElementFqId, EventId, LolaError, QualityLevel};
use std::collections::HashMap;
use std::mem::size_of;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A consumer attached to one offered service instance. Holds one
/// transaction log per event it has registered for.
pub struct Proxy {
    handle: ServiceInstanceHandle,
    _usage_marker: UsageMarker,
    shared: Arc<SharedInstance>,
    log_indices: Mutex<HashMap<EventId, usize>>,
    high_water_marks: Mutex<HashMap<EventId, u32>>,
    subscribed_skeleton_pid: Mutex<Option<u32>>,
    pid: u32,
}

impl Proxy {
    /// Attaches to the service instance `handle` locates. Takes the usage
    /// marker, but does not itself register a transaction log for any
    /// event — call [`Proxy::subscribe`] for each event of interest.
    pub fn new(handle: ServiceInstanceHandle) -> Result<Proxy, LolaError> {
        let path_builder = PartialRestartPathBuilder::new(handle.service_id);
        ensure_partial_restart_directory(&path_builder)
            .map_err(|e| LolaError::BindingFailure(e.to_string()))?;
        let usage_path = path_builder.usage_marker_path(handle.instance_id);
        let usage_marker = UsageMarker::acquire(&usage_path)
            .map_err(|e| LolaError::BindingFailure(e.to_string()))?;

        let shared = lookup_instance(handle.service_id, handle.instance_id)
            .ok_or(LolaError::InvalidHandle)?;

        info!(%handle, "proxy attached to service instance");

        Ok(Proxy {
            handle,
            _usage_marker: usage_marker,
            shared,
            log_indices: Mutex::new(HashMap::new()),
            high_water_marks: Mutex::new(HashMap::new()),
            subscribed_skeleton_pid: Mutex::new(None),
            pid: std::process::id(),
        })
    }

    pub fn handle(&self) -> ServiceInstanceHandle {
        self.handle
    }

    /// Registers a transaction log for `event_id` and sends a `Subscribe`
    /// control message to the offering process (`skeleton_pid`). If the log
    /// index this proxy was handed carries stale begin/end bits left by a
    /// prior incarnation of this process, rolls them back before use.
    pub fn subscribe(&self, event_id: EventId, skeleton_pid: u32) -> Result<(), LolaError> {
        let control = self.shared.control.get(event_id)?;
        let log_index = control.log_set().register_subscriber()?;
        let log = control.log_set().log(log_index);
        if !log.is_empty() {
            warn!(?event_id, log_index, "stale transaction log from a prior incarnation, rolling back");
            control.rollback_transactions(log);
        }
        self.log_indices.lock().unwrap().insert(event_id, log_index);
        *self.subscribed_skeleton_pid.lock().unwrap() = Some(skeleton_pid);

        let event = ElementFqId::new(self.handle.service_id, self.handle.instance_id, event_id);
        self.send_control_message(
            skeleton_pid,
            Message::Subscribe { event, subscriber_pid: self.pid },
        );
        Ok(())
    }

    pub fn unsubscribe(&self, event_id: EventId) -> Result<(), LolaError> {
        let control = self.shared.control.get(event_id)?;
        if let Some(log_index) = self.log_indices.lock().unwrap().remove(&event_id) {
            let log = control.log_set().log(log_index);
            control.log_set().unregister(log_index);
            debug!(?event_id, log_index, "unregistered transaction log");
            let _ = log;
        }
        if let Some(skeleton_pid) = *self.subscribed_skeleton_pid.lock().unwrap() {
            let event = ElementFqId::new(self.handle.service_id, self.handle.instance_id, event_id);
            self.send_control_message(
                skeleton_pid,
                Message::Unsubscribe { event, subscriber_pid: self.pid },
            );
        }
        Ok(())
    }

    fn send_control_message(&self, skeleton_pid: u32, message: Message) {
        let runtime = Runtime::get();
        let sender =
            runtime.messaging().get_sender(QualityLevel::Qm, skeleton_pid, blocking_sender_factory(20));
        if sender.send(message).is_err() {
            warn!(skeleton_pid, "failed to deliver control message to skeleton");
        }
    }

    /// Acquires up to `max_n` samples newer than this event's high-water
    /// mark, advancing the mark to the newest acquired timestamp.
    pub fn get_new_samples<T: Copy>(
        &self,
        event_id: EventId,
        max_n: usize,
    ) -> Result<Vec<SampleRef<T>>, LolaError> {
        let meta = self.shared.storage.get(event_id)?;
        if size_of::<T>() != meta.size_of_slot {
            return Err(LolaError::InvalidConfiguration(format!(
                "event type size {} does not match registered layout {}",
                size_of::<T>(),
                meta.size_of_slot
            )));
        }
        let control = self.shared.control.get(event_id)?;
        let log_index = *self.log_indices.lock().unwrap().get(&event_id).ok_or(LolaError::InvalidHandle)?;
        let log = control.log_set().log(log_index);

        let last_seen = *self.high_water_marks.lock().unwrap().get(&event_id).unwrap_or(&0);
        let acquired = control.acquire_newest(log, last_seen, max_n);

        if let Some(newest) = acquired.iter().map(|a| a.timestamp).max() {
            self.high_water_marks.lock().unwrap().insert(event_id, newest);
        }

        let samples = acquired
            .into_iter()
            .map(|a| {
                // SAFETY: `a.index` was just acquired (refcount held), so the
                // producer cannot reuse or overwrite this slot until this
                // reference is released.
                let value = unsafe {
                    let ptr = self
                        .shared
                        .data_ptr()
                        .add(meta.data_offset as usize + a.index * meta.size_of_slot) as *const T;
                    ptr.read()
                };
                SampleRef::new(Arc::clone(&self.shared), event_id, log_index, a.index, a.timestamp, value)
            })
            .collect();
        Ok(samples)
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        let event_ids: Vec<EventId> = self.log_indices.lock().unwrap().keys().copied().collect();
        for event_id in event_ids {
            let _ = self.unsubscribe(event_id);
        }
    }
}
