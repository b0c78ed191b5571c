//! Process-wide runtime singleton: the one entity whose lifecycle brackets
//! every skeleton and proxy in a process.
//!
//! Created lazily on first use, lives until process exit. Tests that need
//! a specific identity or quality level call [`Runtime::init`] before
//! touching any skeleton/proxy API, bypassing the lazy QM default.

use lola_config::ShmSizeCalcMode;
use lola_messaging::{LocalQualityLevel, MessagingControlPlane};
use lola_types::QualityLevel;
use std::sync::OnceLock;
use tracing::info;

use crate::rollback::RollbackRegistry;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Everything that is read-only after process init and shared by every
/// skeleton/proxy the process creates.
pub struct Runtime {
    quality_level: QualityLevel,
    pid: u32,
    uid: u32,
    shm_size_calc_mode: ShmSizeCalcMode,
    messaging: MessagingControlPlane,
    rollback: RollbackRegistry,
}

impl Runtime {
    fn new(quality_level: QualityLevel, shm_size_calc_mode: ShmSizeCalcMode) -> Self {
        info!(?quality_level, ?shm_size_calc_mode, "initializing LoLa runtime");
        Self {
            quality_level,
            pid: std::process::id(),
            uid: current_uid(),
            shm_size_calc_mode,
            messaging: MessagingControlPlane::new(LocalQualityLevel(quality_level)),
            rollback: RollbackRegistry::new(),
        }
    }

    /// Returns the process-wide runtime, creating it with QM defaults on
    /// first call if nothing has initialized or injected it yet.
    pub fn get() -> &'static Runtime {
        RUNTIME.get_or_init(|| Runtime::new(QualityLevel::Qm, ShmSizeCalcMode::Estimation))
    }

    /// Explicitly initializes the runtime with the given identity, ahead of
    /// the first lazy `get()`. Returns `Err` (the already-initialized
    /// runtime) if called more than once or after `get()` already ran.
    pub fn init(
        quality_level: QualityLevel,
        shm_size_calc_mode: ShmSizeCalcMode,
    ) -> Result<&'static Runtime, &'static Runtime> {
        let mut initialized_here = false;
        let runtime = RUNTIME.get_or_init(|| {
            initialized_here = true;
            Runtime::new(quality_level, shm_size_calc_mode)
        });
        if initialized_here { Ok(runtime) } else { Err(runtime) }
    }

    pub fn quality_level(&self) -> QualityLevel {
        self.quality_level
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn shm_size_calc_mode(&self) -> ShmSizeCalcMode {
        self.shm_size_calc_mode
    }

    pub fn messaging(&self) -> &MessagingControlPlane {
        &self.messaging
    }

    pub fn rollback(&self) -> &RollbackRegistry {
        &self.rollback
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: getuid takes no arguments and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}
