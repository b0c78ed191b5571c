mod access_control;
mod registry;
mod segment;
mod segment_path;
mod service_data;

pub use access_control::{control_segment_mode, DATA_SEGMENT_MODE};
pub use registry::{lookup_instance, register_instance, unregister_instance, SharedInstance};
pub use segment::{
    create_asil_b_control_segment, create_data_segment, create_qm_control_segment,
    unlink_segments,
};
pub use segment_path::{segment_path, SegmentKind};
pub use service_data::{EventStorageMeta, ServiceDataControl, ServiceDataStorage};
