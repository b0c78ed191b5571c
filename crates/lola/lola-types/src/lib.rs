//! Shared identifiers and error types for the LoLa shared-memory binding.
//!
//! Every other `lola-*` crate depends on this one for the small set of
//! plain-old-data identifiers that flow between the skeleton, the proxy,
//! the messaging control plane and the configuration layer. Keeping them
//! here avoids a dependency cycle between those crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a service type, as assigned in the deployment's type deployment.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ServiceId(pub u16);

/// Identifies one instance of a service (one skeleton offering it).
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct InstanceId(pub u16);

/// Identifies one event (or field) within a service type. 8 bits per the
/// type deployment's `events` map (name -> id).
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EventId(pub u8);

impl ServiceId {
    /// Renders as the 16 decimal digit, zero-padded form used in marker and
    /// shared-memory file names (`existence-<this>-<instance>`). Decimal,
    /// not hex, despite the name: it matches the zero-padded `%016u` the
    /// original binding renders the service id's integer value with.
    pub fn to_hex16(self) -> String {
        format!("{:016}", self.0)
    }
}

impl InstanceId {
    /// Renders as the 5 decimal digit, zero-padded form used in marker and
    /// shared-memory file names.
    pub fn to_dec5(self) -> String {
        format!("{:05}", self.0)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified identity of one event slot array: which service
/// instance and which event within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementFqId {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub event_id: EventId,
}

impl ElementFqId {
    pub fn new(service_id: ServiceId, instance_id: InstanceId, event_id: EventId) -> Self {
        Self { service_id, instance_id, event_id }
    }
}

/// Safety-qualification level of a process. ASIL-B processes must never be
/// blockable by a QM peer (see `lola-messaging`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityLevel {
    /// Quality Managed: unqualified.
    Qm,
    /// Automotive Safety Integrity Level B: safety-qualified.
    AsilB,
}

impl QualityLevel {
    /// The message-queue name suffix for this quality level (`_QM` / `_ASIL_B`).
    pub fn queue_suffix(self) -> &'static str {
        match self {
            QualityLevel::Qm => "_QM",
            QualityLevel::AsilB => "_ASIL_B",
        }
    }
}

/// Binding-level errors surfaced to skeleton/proxy callers.
///
/// Fatal variants (configuration, serialization version, unknown binding)
/// are meant to terminate the process per the propagation policy; operational
/// variants (allocation exhaustion, queue full) are transient and retryable.
#[derive(Debug, thiserror::Error)]
pub enum LolaError {
    #[error("no sample slot available for allocation")]
    SampleAllocationFailure,

    #[error("transaction log set is full (max_subscribers exceeded)")]
    MaxSubscribersExceeded,

    #[error("invalid or missing deployment configuration: {0}")]
    InvalidConfiguration(String),

    #[error("could not parse serialized instance identifier: {0}")]
    InvalidInstanceIdentifierString(String),

    #[error("underlying service-discovery binding failed: {0}")]
    BindingFailure(String),

    #[error("find-service handler registration failed: {0}")]
    FindServiceHandlerFailure(String),

    #[error("handle does not refer to a known service instance")]
    InvalidHandle,

    #[error("cannot unlink segments: a subscriber still holds a reference to a slot")]
    SegmentsStillReferenced,
}

impl LolaError {
    /// True for errors that should terminate the process (see propagation
    /// policy): configuration mismatches, broken serialization versions,
    /// unknown binding variants. False for transient/retryable errors.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LolaError::InvalidConfiguration(_)
                | LolaError::InvalidInstanceIdentifierString(_)
                | LolaError::BindingFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_hex16_is_zero_padded() {
        assert_eq!(ServiceId(0x0001).to_hex16(), "0000000000000001");
        assert_eq!(ServiceId(0x1234).to_hex16(), "0000000000004660");
    }

    #[test]
    fn instance_id_dec5_is_zero_padded() {
        assert_eq!(InstanceId(16).to_dec5(), "00016");
        assert_eq!(InstanceId(43981).to_dec5(), "43981");
    }

    #[test]
    fn fatal_errors_are_classified_correctly() {
        assert!(LolaError::InvalidConfiguration("x".into()).is_fatal());
        assert!(!LolaError::SampleAllocationFailure.is_fatal());
        assert!(!LolaError::MaxSubscribersExceeded.is_fatal());
    }
}
