//! Per-process messaging control plane: owns one sender per (quality
//! level, peer pid) pair and enforces the mixed-criticality rule that an
//! ASIL-B process must never be blockable by a QM peer.

use crate::sender::{BlockingSender, NonBlockingSender, Sender};
use lola_types::QualityLevel;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Default ring size used when an ASIL-B process wraps a QM peer's sender
/// in a [`NonBlockingSender`]. Small enough to stay well under
/// [`crate::sender::QUEUE_SIZE_UPPER_LIMIT`], large enough to absorb a
/// short burst of control messages.
pub const DEFAULT_NON_BLOCKING_RING_SIZE: usize = 16;

/// Builds the queue name an OS message queue sender for `peer_pid` at
/// `quality` would bind to: `/LoLa_<pid>_QM` or `/LoLa_<pid>_ASIL_B`.
pub fn queue_name(peer_pid: u32, quality: QualityLevel) -> String {
    format!("/LoLa_{peer_pid}{}", quality.queue_suffix())
}

/// The owning process's own criticality class. Determines whether outbound
/// senders to QM peers must be wrapped to preserve the non-blocking
/// guarantee this process itself requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalQualityLevel(pub QualityLevel);

struct SenderCache {
    senders: HashMap<u32, Arc<dyn Sender>>,
}

impl SenderCache {
    fn new() -> Self {
        Self { senders: HashMap::new() }
    }
}

/// Owns the senders this process uses to reach every peer it has ever
/// messaged, keyed by the peer's quality level and pid. Construction of the
/// underlying sender is the caller's responsibility (passed in via
/// `get_or_insert_with`'s factory) since it depends on the transport (a
/// real OS queue outside this crate's scope, or the in-process
/// [`BlockingSender`] stand-in used here).
pub struct MessagingControlPlane {
    local_quality: LocalQualityLevel,
    qm_peers: Mutex<SenderCache>,
    asil_b_peers: Mutex<SenderCache>,
}

impl MessagingControlPlane {
    pub fn new(local_quality: LocalQualityLevel) -> Self {
        Self {
            local_quality,
            qm_peers: Mutex::new(SenderCache::new()),
            asil_b_peers: Mutex::new(SenderCache::new()),
        }
    }

    fn cache_for(&self, quality: QualityLevel) -> &Mutex<SenderCache> {
        match quality {
            QualityLevel::Qm => &self.qm_peers,
            QualityLevel::AsilB => &self.asil_b_peers,
        }
    }

    /// Returns the cached sender for `(quality, peer_pid)`, constructing it
    /// via `make_sender` on first use. If this process is ASIL-B and the
    /// peer is QM, and `make_sender` doesn't already produce a sender with
    /// a non-blocking guarantee, the result is transparently wrapped in a
    /// [`NonBlockingSender`] so the caller can never be blocked by a QM
    /// peer's queue filling up.
    pub fn get_sender(
        &self,
        quality: QualityLevel,
        peer_pid: u32,
        make_sender: impl FnOnce() -> Box<dyn Sender>,
    ) -> Arc<dyn Sender> {
        let cache = self.cache_for(quality);
        let mut guard = cache.lock().unwrap();
        if let Some(sender) = guard.senders.get(&peer_pid) {
            return Arc::clone(sender);
        }

        let built = make_sender();
        let must_wrap = self.local_quality.0 == QualityLevel::AsilB
            && quality == QualityLevel::Qm
            && !built.has_non_blocking_guarantee();

        let sender: Arc<dyn Sender> = if must_wrap {
            info!(
                peer_pid,
                "wrapping QM peer sender in non-blocking adapter to protect ASIL-B caller"
            );
            Arc::new(NonBlockingSender::new(built, DEFAULT_NON_BLOCKING_RING_SIZE))
        } else {
            Arc::from(built)
        };

        guard.senders.insert(peer_pid, Arc::clone(&sender));
        sender
    }

    /// Drops the cached sender for a peer, e.g. on receiving its
    /// `Disconnect` message. A subsequent `get_sender` call rebuilds it.
    pub fn remove_sender(&self, quality: QualityLevel, peer_pid: u32) {
        self.cache_for(quality).lock().unwrap().senders.remove(&peer_pid);
    }
}

/// Convenience factory wrapping a fresh in-process [`BlockingSender`] pair;
/// production transports would instead bind to the OS queue named by
/// [`queue_name`].
pub fn blocking_sender_factory(capacity: usize) -> impl FnOnce() -> Box<dyn Sender> {
    move || {
        let (sender, _rx) = crate::sender::blocking_channel(capacity);
        Box::new(sender) as Box<dyn Sender>
    }
}
