mod config;

pub use config::{
    ConfigError, EventInstanceDeployment, GlobalConfig, InstanceDeployment,
    ServiceInstanceManifest, ServiceTypeDeployment, ShmSizeCalcMode,
    EXPECTED_SERIALIZATION_VERSION,
};
