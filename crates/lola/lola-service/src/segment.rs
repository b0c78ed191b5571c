//! Shared-memory segment creation and sizing for an offered service
//! instance: one data segment, one QM control segment, and (ASIL-B only)
//! one additional ASIL-B control segment.

use crate::access_control::{control_segment_mode, DATA_SEGMENT_MODE};
use crate::segment_path::{segment_path, SegmentKind};
use lola_shm::MmapFileMut;
use lola_types::{InstanceId, ServiceId};
use std::io;
use tracing::info;

/// Creates the data segment for a service instance, sized to exactly
/// `size_bytes` (as computed by laying out every event against a sizing
/// arena first). Always owner-only; never writable by consumers.
pub fn create_data_segment(
    service_id: ServiceId,
    instance_id: InstanceId,
    size_bytes: u64,
) -> io::Result<MmapFileMut> {
    let path = segment_path(service_id, instance_id, SegmentKind::Data);
    info!(path = %path.display(), size_bytes, "creating data segment");
    MmapFileMut::create_rw(&path, size_bytes, DATA_SEGMENT_MODE)
}

/// Creates the QM control segment. Writable by other criticality peers
/// unless `strict` deployment permissions are on.
pub fn create_qm_control_segment(
    service_id: ServiceId,
    instance_id: InstanceId,
    size_bytes: u64,
    strict: bool,
) -> io::Result<MmapFileMut> {
    let path = segment_path(service_id, instance_id, SegmentKind::QmControl);
    let mode = control_segment_mode(strict);
    info!(path = %path.display(), size_bytes, mode, "creating QM control segment");
    MmapFileMut::create_rw(&path, size_bytes, mode)
}

/// Creates the additional ASIL-B control segment. Only called when the
/// offering process itself runs at ASIL-B.
pub fn create_asil_b_control_segment(
    service_id: ServiceId,
    instance_id: InstanceId,
    size_bytes: u64,
    strict: bool,
) -> io::Result<MmapFileMut> {
    let path = segment_path(service_id, instance_id, SegmentKind::AsilBControl);
    let mode = control_segment_mode(strict);
    info!(path = %path.display(), size_bytes, mode, "creating ASIL-B control segment");
    MmapFileMut::create_rw(&path, size_bytes, mode)
}

/// Unlinks every segment backing file for a service instance. Only safe to
/// call once every subscriber's reference count on every slot has reached
/// zero (enforced by the caller, typically `stop_offer`).
pub fn unlink_segments(
    service_id: ServiceId,
    instance_id: InstanceId,
    has_asil_b_control: bool,
) -> io::Result<()> {
    let data = segment_path(service_id, instance_id, SegmentKind::Data);
    let qm_ctl = segment_path(service_id, instance_id, SegmentKind::QmControl);
    std::fs::remove_file(&data)?;
    std::fs::remove_file(&qm_ctl)?;
    if has_asil_b_control {
        let asil_ctl = segment_path(service_id, instance_id, SegmentKind::AsilBControl);
        std::fs::remove_file(&asil_ctl)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scenario_s1_qm_offer_creates_data_and_qm_segments_without_b() {
        let service_id = ServiceId(0xFEED);
        let instance_id = InstanceId(7);

        let data = create_data_segment(service_id, instance_id, 256).unwrap();
        let ctl = create_qm_control_segment(service_id, instance_id, 128, false).unwrap();
        assert_eq!(data.len(), 256);
        assert_eq!(ctl.len(), 128);

        let data_path = segment_path(service_id, instance_id, SegmentKind::Data);
        let ctl_path = segment_path(service_id, instance_id, SegmentKind::QmControl);
        let asil_path = segment_path(service_id, instance_id, SegmentKind::AsilBControl);
        assert!(data_path.exists());
        assert!(ctl_path.exists());
        assert!(!asil_path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(&data_path).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, DATA_SEGMENT_MODE);
        }

        let _ = unlink_segments(service_id, instance_id, false);
    }

    #[test]
    fn scenario_s2_asil_b_offer_adds_b_control_segment() {
        let service_id = ServiceId(0xFEEE);
        let instance_id = InstanceId(8);

        let _data = create_data_segment(service_id, instance_id, 64).unwrap();
        let _qm = create_qm_control_segment(service_id, instance_id, 64, false).unwrap();
        let _asil = create_asil_b_control_segment(service_id, instance_id, 64, false).unwrap();

        let asil_path = segment_path(service_id, instance_id, SegmentKind::AsilBControl);
        assert!(asil_path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(&asil_path).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o666);
        }

        let _ = unlink_segments(service_id, instance_id, true);
    }
}
