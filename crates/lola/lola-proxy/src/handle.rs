//! The opaque handle a proxy is constructed from: just enough to locate a
//! service instance, parsed out of whatever string a service-discovery
//! layer (out of scope here) handed back.

use lola_types::{InstanceId, LolaError, ServiceId};
use std::fmt;
use std::str::FromStr;

/// Locates one service instance. Serializes as `"<service-id>/<instance-id>"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceInstanceHandle {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
}

impl ServiceInstanceHandle {
    pub fn new(service_id: ServiceId, instance_id: InstanceId) -> Self {
        Self { service_id, instance_id }
    }
}

impl fmt::Display for ServiceInstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_id.0, self.instance_id.0)
    }
}

impl FromStr for ServiceInstanceHandle {
    type Err = LolaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (service_part, instance_part) = s
            .split_once('/')
            .ok_or_else(|| LolaError::InvalidInstanceIdentifierString(s.to_string()))?;
        let service_id: u16 = service_part
            .parse()
            .map_err(|_| LolaError::InvalidInstanceIdentifierString(s.to_string()))?;
        let instance_id: u16 = instance_part
            .parse()
            .map_err(|_| LolaError::InvalidInstanceIdentifierString(s.to_string()))?;
        Ok(Self::new(ServiceId(service_id), InstanceId(instance_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let handle = ServiceInstanceHandle::new(ServiceId(1), InstanceId(16));
        let parsed: ServiceInstanceHandle = handle.to_string().parse().unwrap();
        assert_eq!(handle, parsed);
    }

    #[test]
    fn malformed_string_is_invalid_instance_identifier() {
        let result: Result<ServiceInstanceHandle, _> = "not-a-handle".parse();
        assert!(matches!(result, Err(LolaError::InvalidInstanceIdentifierString(_))));
    }
}
