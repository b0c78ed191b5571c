//! Control-plane message types: subscribe, unsubscribe, event-update
//! notification, and disconnect.

use lola_types::{ElementFqId, InstanceId, ServiceId};

/// A side-channel control notification exchanged between skeletons and
/// proxies. These never carry sample payloads — only the fact that
/// something about a subscription or a service instance's lifecycle
/// changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    /// A proxy wants to start receiving updates for `event`.
    Subscribe { event: ElementFqId, subscriber_pid: u32 },
    /// A proxy no longer wants updates for `event`.
    Unsubscribe { event: ElementFqId, subscriber_pid: u32 },
    /// The skeleton published a new sample for `event`.
    EventUpdated { event: ElementFqId },
    /// A peer (producer or consumer) is shutting down cleanly.
    Disconnect { service_id: ServiceId, instance_id: InstanceId, pid: u32 },
}
