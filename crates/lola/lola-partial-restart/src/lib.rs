//! Partial-restart markers: filesystem lock files that signal whether a
//! service instance is currently being offered (existence marker) or used
//! (usage marker), so a recovering peer can tell a crashed process from a
//! merely-slow one.
//!
//! File names and directory layout are reproduced exactly as specified:
//! `existence-<service-id-16-dec>-<instance-id-5-dec>` and
//! `usage-<service-id-16-dec>-<instance-id-5-dec>`, under
//! `/tmp/mw_com_lola/partial_restart/` on a generic host or
//! `/tmp_discovery/mw_com_lola/partial_restart/` under QNX.

use fs2::FileExt;
use lola_types::{InstanceId, ServiceId};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOLA_DIR: &str = "mw_com_lola/";
const PARTIAL_RESTART_DIR: &str = "partial_restart/";
const EXISTENCE_TAG: &str = "existence-";
const USAGE_TAG: &str = "usage-";

#[cfg(target_os = "nto")]
const TMP_PATH_PREFIX: &str = "/tmp_discovery/";
#[cfg(not(target_os = "nto"))]
const TMP_PATH_PREFIX: &str = "/tmp/";

/// Builds the filesystem paths used for partial-restart detection of one
/// service type (`service_id` is fixed; `instance_id` varies per call).
pub struct PartialRestartPathBuilder {
    service_id: ServiceId,
}

impl PartialRestartPathBuilder {
    pub fn new(service_id: ServiceId) -> Self {
        Self { service_id }
    }

    /// Directory that must exist before any marker file is created.
    pub fn partial_restart_directory(&self) -> PathBuf {
        PathBuf::from(TMP_PATH_PREFIX).join(LOLA_DIR).join(PARTIAL_RESTART_DIR)
    }

    pub fn existence_marker_path(&self, instance_id: InstanceId) -> PathBuf {
        self.partial_restart_directory().join(format!(
            "{EXISTENCE_TAG}{}-{}",
            self.service_id.to_hex16(),
            instance_id.to_dec5()
        ))
    }

    pub fn usage_marker_path(&self, instance_id: InstanceId) -> PathBuf {
        self.partial_restart_directory().join(format!(
            "{USAGE_TAG}{}-{}",
            self.service_id.to_hex16(),
            instance_id.to_dec5()
        ))
    }
}

/// Ensures the partial-restart directory exists, creating it (and its
/// parents) if necessary.
pub fn ensure_partial_restart_directory(builder: &PartialRestartPathBuilder) -> io::Result<()> {
    std::fs::create_dir_all(builder.partial_restart_directory())
}

/// An exclusively-locked existence marker, held by a skeleton for as long as
/// it offers a service instance. Dropping it releases the lock; the file
/// itself is left behind (cheap, and its presence without a lock is itself
/// useful evidence that a prior producer existed and crashed).
pub struct ExistenceMarker {
    _file: File,
    path: PathBuf,
}

impl ExistenceMarker {
    /// Attempts to exclusively acquire the existence marker at `path`.
    /// Fails (non-blocking) if another live producer already holds it —
    /// the caller should treat this as "duplicate producer".
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        file.try_lock_exclusive().map_err(|e| {
            warn!(path = %path.display(), "existence marker already held: duplicate producer");
            e
        })?;
        debug!(path = %path.display(), "existence marker acquired");
        Ok(Self { _file: file, path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExistenceMarker {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self._file);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A shared-locked usage marker, held by a proxy for as long as it is
/// subscribed. Multiple consumers may hold the same usage marker
/// concurrently (shared lock); the skeleton probes liveness by attempting a
/// non-blocking exclusive lock (see [`is_marker_abandoned`]).
pub struct UsageMarker {
    _file: File,
    path: PathBuf,
}

impl UsageMarker {
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        file.try_lock_shared()?;
        debug!(path = %path.display(), "usage marker acquired");
        Ok(Self { _file: file, path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UsageMarker {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self._file);
    }
}

/// Probes whether a marker file has no live holder left: opens it and tries
/// a non-blocking exclusive lock. If that succeeds, nobody was holding a
/// lock (shared or exclusive) on it, so the prior owner is gone; the probe
/// releases its own lock immediately so it doesn't itself claim the marker.
///
/// Returns `Ok(true)` ("abandoned") if the file doesn't exist at all, since
/// that is equally evidence that there is no live holder to recover from.
pub fn is_marker_abandoned(path: &Path) -> io::Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            fs2::FileExt::unlock(&file)?;
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_dir() -> PathBuf {
        std::env::temp_dir().join(format!("lola_partial_restart_test_{}", std::process::id()))
    }

    #[test]
    fn existence_marker_filename_matches_literal_format() {
        let builder = PartialRestartPathBuilder::new(ServiceId(0x1234));
        let path = builder.existence_marker_path(InstanceId(43981));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "existence-0000000000004660-43981"
        );
    }

    #[test]
    fn scenario_s3_full_path_is_reproduced_exactly() {
        let builder = PartialRestartPathBuilder::new(ServiceId(0x1234));
        let path = builder.existence_marker_path(InstanceId(0xABCD));
        #[cfg(not(target_os = "nto"))]
        assert_eq!(
            path,
            PathBuf::from("/tmp/mw_com_lola/partial_restart/existence-0000000000004660-43981")
        );
    }

    #[test]
    fn usage_marker_uses_usage_tag() {
        let builder = PartialRestartPathBuilder::new(ServiceId(1));
        let path = builder.usage_marker_path(InstanceId(16));
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "usage-0000000000000001-00016");
    }

    #[test]
    fn second_existence_marker_acquire_fails_while_first_is_held() {
        let dir = instance_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("existence-test-dup");

        let _first = ExistenceMarker::acquire(&path).unwrap();
        assert!(ExistenceMarker::acquire(&path).is_err());
    }

    #[test]
    fn marker_is_abandoned_after_holder_drops() {
        let dir = instance_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("existence-test-abandon");

        {
            let _marker = ExistenceMarker::acquire(&path).unwrap();
            assert!(!is_marker_abandoned(&path).unwrap());
        }
        // The file was removed by Drop; a missing marker counts as abandoned.
        assert!(is_marker_abandoned(&path).unwrap());
    }

    #[test]
    fn usage_markers_allow_multiple_concurrent_shared_holders() {
        let dir = instance_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("usage-test-shared");

        let _first = UsageMarker::acquire(&path).unwrap();
        let _second = UsageMarker::acquire(&path).unwrap();
    }
}
