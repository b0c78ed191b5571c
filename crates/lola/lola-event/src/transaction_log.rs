//! Per-subscriber transaction log and the fixed-capacity set of logs per event.
//!
//! The log exists to make crash recovery possible: before a consumer CASes a
//! slot's refcount up, it records `begin[slot] := true`; once the CAS wins,
//! it records `end[slot] := true`. If the consumer dies between the two
//! writes, `begin=true, end=false` marks an increment that never happened
//! (nothing to undo); `begin=true, end=true` marks a live reference the
//! recovering process must release on the dead consumer's behalf.

use lola_types::LolaError;
use std::sync::atomic::{AtomicBool, Ordering};

/// Append-only per-slot `begin`/`end` bits for one subscriber of one event.
pub struct TransactionLog {
    begin: Box<[AtomicBool]>,
    end: Box<[AtomicBool]>,
    claimed: AtomicBool,
}

impl TransactionLog {
    fn new(num_slots: usize) -> Self {
        Self {
            begin: (0..num_slots).map(|_| AtomicBool::new(false)).collect(),
            end: (0..num_slots).map(|_| AtomicBool::new(false)).collect(),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn num_slots(&self) -> usize {
        self.begin.len()
    }

    #[inline]
    pub fn set_begin(&self, slot: usize) {
        self.begin[slot].store(true, Ordering::Release);
    }

    #[inline]
    pub fn set_end(&self, slot: usize) {
        self.end[slot].store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_begin(&self, slot: usize) -> bool {
        self.begin[slot].load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_end(&self, slot: usize) -> bool {
        self.end[slot].load(Ordering::Acquire)
    }

    /// Clears both bits for one slot, e.g. after a clean release or a
    /// rollback of that slot's entry.
    #[inline]
    pub fn clear(&self, slot: usize) {
        self.begin[slot].store(false, Ordering::Release);
        self.end[slot].store(false, Ordering::Release);
    }

    /// True if any slot still has an outstanding `begin` bit set. A freshly
    /// registered or just-rolled-back log is observably empty: this is
    /// false for it.
    pub fn is_empty(&self) -> bool {
        (0..self.num_slots()).all(|i| !self.is_begin(i))
    }

    fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release_claim(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

/// Fixed-capacity vector of transaction logs for one event, keyed by
/// subscriber slot index. Capacity is `max_subscribers + 1`: the last index
/// is reserved for the skeleton-side tracing subscriber (see
/// `register_tracing_subscriber`).
pub struct TransactionLogSet {
    logs: Vec<TransactionLog>,
    max_subscribers: usize,
}

impl TransactionLogSet {
    pub fn new(num_slots: usize, max_subscribers: usize) -> Self {
        let capacity = max_subscribers + 1;
        Self {
            logs: (0..capacity).map(|_| TransactionLog::new(num_slots)).collect(),
            max_subscribers,
        }
    }

    pub fn capacity(&self) -> usize {
        self.logs.len()
    }

    pub fn max_subscribers(&self) -> usize {
        self.max_subscribers
    }

    /// Claims a free log slot among the ordinary subscriber range
    /// (`0..max_subscribers`, excluding the reserved tracing slot).
    pub fn register_subscriber(&self) -> Result<usize, LolaError> {
        for idx in 0..self.max_subscribers {
            if self.logs[idx].claim() {
                return Ok(idx);
            }
        }
        Err(LolaError::MaxSubscribersExceeded)
    }

    /// Claims the reserved last slot for the skeleton-side tracing
    /// subscriber. Idempotent only in the sense that calling it twice
    /// without an intervening `unregister` fails like any other claim.
    pub fn register_tracing_subscriber(&self) -> Result<usize, LolaError> {
        let idx = self.max_subscribers;
        if self.logs[idx].claim() {
            Ok(idx)
        } else {
            Err(LolaError::MaxSubscribersExceeded)
        }
    }

    /// Returns `index` to the free pool. The log must already be
    /// observably empty (all entries cleared, typically via
    /// `rollback_transactions` or clean release of every reference).
    pub fn unregister(&self, index: usize) {
        debug_assert!(self.logs[index].is_empty(), "unregistering a log with stale entries");
        self.logs[index].release_claim();
    }

    pub fn log(&self, index: usize) -> &TransactionLog {
        &self.logs[index]
    }

    /// Iterates every claimed log whose owner `is_live` reports as gone and
    /// returns their indices, so the caller (producer, during partial-restart
    /// recovery) can run `rollback_transactions` on each before reclaiming it.
    pub fn stale_log_indices(&self, is_live: impl Fn(usize) -> bool) -> Vec<usize> {
        (0..self.logs.len())
            .filter(|&idx| self.logs[idx].is_claimed() && !is_live(idx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_leaves_set_unchanged() {
        let set = TransactionLogSet::new(4, 2);
        let idx = set.register_subscriber().unwrap();
        assert!(set.log(idx).is_claimed());
        set.unregister(idx);
        assert!(!set.log(idx).is_claimed());
    }

    #[test]
    fn registering_past_capacity_fails() {
        let set = TransactionLogSet::new(4, 2);
        let _a = set.register_subscriber().unwrap();
        let _b = set.register_subscriber().unwrap();
        assert!(matches!(set.register_subscriber(), Err(LolaError::MaxSubscribersExceeded)));
    }

    #[test]
    fn tracing_subscriber_uses_reserved_last_slot() {
        let set = TransactionLogSet::new(4, 2);
        let idx = set.register_tracing_subscriber().unwrap();
        assert_eq!(idx, 2);
        assert_eq!(set.capacity(), 3);
    }

    #[test]
    fn begin_without_end_is_not_stale_rollback_target() {
        let log = TransactionLog::new(4);
        log.set_begin(1);
        assert!(log.is_begin(1));
        assert!(!log.is_end(1));
        assert!(!log.is_empty());
    }
}
