use lola_types::{EventId, InstanceId, QualityLevel, ServiceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// The only serialization version this binding understands. Loading a
/// manifest stamped with any other value is a fatal configuration error —
/// there is no compatibility shim between manifest generations.
pub const EXPECTED_SERIALIZATION_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest json")]
    Parse(#[from] serde_json::Error),

    #[error(
        "manifest serialization version {found} does not match expected {EXPECTED_SERIALIZATION_VERSION}"
    )]
    VersionMismatch { found: u32 },
}

/// How a data segment's size is determined before it is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShmSizeCalcMode {
    #[serde(rename = "kEstimation")]
    Estimation,
    #[serde(rename = "kSimulation")]
    Simulation,
}

impl Default for ShmSizeCalcMode {
    fn default() -> Self {
        Self::Estimation
    }
}

/// Deployment parameters for a single event within a service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInstanceDeployment {
    pub number_of_sample_slots: usize,
    pub max_subscribers: usize,
    pub max_concurrent_allocations: usize,
    #[serde(default)]
    pub enforce_max_samples: bool,
}

/// Maps the symbolic event/field names of a service type to their wire
/// identifiers, and names the service type's own id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTypeDeployment {
    pub service_id: ServiceId,
    #[serde(default)]
    pub events: HashMap<String, EventId>,
    #[serde(default)]
    pub fields: HashMap<String, EventId>,
}

/// Per-instance deployment: which physical instance id this binding
/// realizes the service type as, and the per-event/per-field tuning that
/// drives shared-memory segment layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDeployment {
    pub serialization_version: u32,
    pub instance_id: InstanceId,
    #[serde(default)]
    pub shared_memory_size: Option<u64>,
    #[serde(default)]
    pub events: HashMap<String, EventInstanceDeployment>,
    #[serde(default)]
    pub fields: HashMap<String, EventInstanceDeployment>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub allowed_consumer: HashMap<String, Vec<u32>>,
    #[serde(default)]
    pub allowed_provider: HashMap<String, Vec<u32>>,
}

fn default_receive_queue_size() -> usize {
    10
}

fn default_send_queue_size() -> usize {
    20
}

/// Process-wide defaults that apply regardless of which service instances
/// the process offers or consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    pub quality_level: QualityLevel,
    #[serde(default = "default_receive_queue_size")]
    pub receive_queue_size: usize,
    #[serde(default = "default_send_queue_size")]
    pub send_queue_size: usize,
    #[serde(default)]
    pub shm_size_calc_mode: ShmSizeCalcMode,
}

/// The full service instance manifest a `-service_instance_manifest` flag
/// points at: one service type, its instance deployment, and the process
/// global configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceManifest {
    pub service_type: ServiceTypeDeployment,
    pub instance: InstanceDeployment,
    pub global: GlobalConfig,
}

impl ServiceInstanceManifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let json = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        let manifest: ServiceInstanceManifest = serde_json::from_str(&json)?;
        if manifest.instance.serialization_version != EXPECTED_SERIALIZATION_VERSION {
            return Err(ConfigError::VersionMismatch {
                found: manifest.instance.serialization_version,
            });
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "serviceType": {
                "serviceId": 1,
                "events": { "speed": 16 },
                "fields": {}
            },
            "instance": {
                "serializationVersion": 1,
                "instanceId": 16,
                "sharedMemorySize": 65536,
                "events": {
                    "speed": {
                        "numberOfSampleSlots": 4,
                        "maxSubscribers": 8,
                        "maxConcurrentAllocations": 2,
                        "enforceMaxSamples": true
                    }
                },
                "fields": {},
                "strict": false,
                "allowedConsumer": { "QM": [1000, 1001] },
                "allowedProvider": { "QM": [2000] }
            },
            "global": {
                "qualityLevel": "Qm",
                "shmSizeCalcMode": "kEstimation"
            }
        }"#
    }

    #[test]
    fn round_trips_a_minimal_manifest() {
        let manifest: ServiceInstanceManifest = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(manifest.service_type.service_id, ServiceId(1));
        assert_eq!(manifest.instance.instance_id, InstanceId(16));
        assert_eq!(manifest.instance.events["speed"].number_of_sample_slots, 4);
        assert_eq!(manifest.global.receive_queue_size, 10);
        assert_eq!(manifest.global.send_queue_size, 20);
        assert_eq!(manifest.global.shm_size_calc_mode, ShmSizeCalcMode::Estimation);

        let reserialized = serde_json::to_string(&manifest).unwrap();
        let reparsed: ServiceInstanceManifest = serde_json::from_str(&reserialized).unwrap();
        assert_eq!(reparsed.instance.instance_id, manifest.instance.instance_id);
    }

    #[test]
    fn load_rejects_serialization_version_mismatch() {
        let dir = std::env::temp_dir().join(format!("lola_config_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("manifest.json");
        let bad = sample_json().replace("\"serializationVersion\": 1", "\"serializationVersion\": 99");
        std::fs::write(&path, bad).unwrap();

        let result = ServiceInstanceManifest::load(&path);
        assert!(matches!(result, Err(ConfigError::VersionMismatch { found: 99 })));
    }

    #[test]
    fn load_reports_read_error_for_missing_file() {
        let result = ServiceInstanceManifest::load("/nonexistent/path/manifest.json");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
