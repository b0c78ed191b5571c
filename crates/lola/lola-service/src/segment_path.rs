//! Shared-memory backing file naming and directory placement.
//!
//! File names are reproduced exactly as specified:
//! `lola-data-<service-id-16-dec>-<instance-id-5-dec>`,
//! `lola-ctl-<service-id-16-dec>-<instance-id-5-dec>`, and (ASIL-B only)
//! `lola-ctl-<service-id-16-dec>-<instance-id-5-dec>-b`. Placement is
//! `/dev/shm/` on a generic host, `/dev/shmem/` under QNX.

use lola_types::{InstanceId, ServiceId};
use std::path::PathBuf;

#[cfg(target_os = "nto")]
const SHM_DIR: &str = "/dev/shmem/";
#[cfg(not(target_os = "nto"))]
const SHM_DIR: &str = "/dev/shm/";

/// Which shared-memory segment a path refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Data,
    QmControl,
    AsilBControl,
}

pub fn segment_path(service_id: ServiceId, instance_id: InstanceId, kind: SegmentKind) -> PathBuf {
    let stem = match kind {
        SegmentKind::Data => {
            format!("lola-data-{}-{}", service_id.to_hex16(), instance_id.to_dec5())
        }
        SegmentKind::QmControl => {
            format!("lola-ctl-{}-{}", service_id.to_hex16(), instance_id.to_dec5())
        }
        SegmentKind::AsilBControl => {
            format!("lola-ctl-{}-{}-b", service_id.to_hex16(), instance_id.to_dec5())
        }
    };
    PathBuf::from(SHM_DIR).join(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s1_data_and_qm_control_paths_match_literal_format() {
        let service_id = ServiceId(0x0001);
        let instance_id = InstanceId(16);
        #[cfg(not(target_os = "nto"))]
        {
            assert_eq!(
                segment_path(service_id, instance_id, SegmentKind::Data),
                PathBuf::from("/dev/shm/lola-data-0000000000000001-00016")
            );
            assert_eq!(
                segment_path(service_id, instance_id, SegmentKind::QmControl),
                PathBuf::from("/dev/shm/lola-ctl-0000000000000001-00016")
            );
        }
    }

    #[test]
    fn scenario_s2_asil_b_control_path_has_b_suffix() {
        let service_id = ServiceId(0x0001);
        let instance_id = InstanceId(16);
        #[cfg(not(target_os = "nto"))]
        assert_eq!(
            segment_path(service_id, instance_id, SegmentKind::AsilBControl),
            PathBuf::from("/dev/shm/lola-ctl-0000000000000001-00016-b")
        );
    }
}
