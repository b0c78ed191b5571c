//! Event data control: slot allocation for the producer, reference
//! acquisition/release for consumers, and rollback for crash recovery.
//!
//! See the module-level docs of `lola-slot` for the per-slot state machine;
//! this type coordinates a whole event's worth of slots plus the
//! transaction-log set that backs crash recovery.

use lola_slot::SlotStateWord;
use lola_types::LolaError;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tracing::{debug, trace, warn};

use crate::transaction_log::{TransactionLog, TransactionLogSet};

/// One successfully acquired reference: which slot, and the timestamp it
/// was published with (used by the caller to advance its high-water mark).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredSlot {
    pub index: usize,
    pub timestamp: u32,
}

/// Per-event allocation/reference state: the slot array, its transaction
/// log set, and the limits from the event's deployment.
pub struct EventDataControl {
    slots: Vec<SlotStateWord>,
    log_set: TransactionLogSet,
    max_concurrent_allocations: usize,
    enforce_max_samples: bool,
    outstanding_allocations: AtomicUsize,
    next_timestamp: AtomicU32,
}

impl EventDataControl {
    pub fn new(
        num_slots: usize,
        max_subscribers: usize,
        max_concurrent_allocations: usize,
        enforce_max_samples: bool,
    ) -> Self {
        Self {
            slots: (0..num_slots).map(|_| SlotStateWord::new()).collect(),
            log_set: TransactionLogSet::new(num_slots, max_subscribers),
            max_concurrent_allocations,
            enforce_max_samples,
            outstanding_allocations: AtomicUsize::new(0),
            next_timestamp: AtomicU32::new(1),
        }
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn log_set(&self) -> &TransactionLogSet {
        &self.log_set
    }

    /// Next monotonic timestamp for this event, starting at 1. Producers
    /// call this exactly once per `send`, after `allocate_slot` succeeds.
    pub fn next_timestamp(&self) -> u32 {
        self.next_timestamp.fetch_add(1, Ordering::Relaxed)
    }

    /// Producer-side allocation (spec §4.2): scans for an allocatable slot
    /// (refcount 0, not in-writing), prefers the oldest timestamp among
    /// candidates, and CASes it to `IN_WRITING`. Retries against the
    /// remaining candidates if a race is lost, bounded by `num_slots`
    /// attempts across the whole pass.
    ///
    /// If every slot still has a live reference, the outcome depends on
    /// `enforce_max_samples`: when set, allocation fails; when unset, the
    /// oldest-timestamped slot is reused anyway (overcap), regardless of its
    /// refcount. Allocation only fails outright when `enforce_max_samples`
    /// is set, or every slot is presently `IN_WRITING`.
    pub fn allocate_slot(&self) -> Result<usize, LolaError> {
        if self.outstanding_allocations.load(Ordering::Acquire) >= self.max_concurrent_allocations {
            warn!(
                max_concurrent_allocations = self.max_concurrent_allocations,
                "slot allocation blocked: max_concurrent_allocations reached"
            );
            return Err(LolaError::SampleAllocationFailure);
        }

        // Gather allocatable candidates with their observed word, so that a
        // lost CAS race doesn't require rescanning slots we already know are
        // unusable. Oldest timestamp first, ties by ascending index.
        let mut candidates: Vec<(usize, u64)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let word = slot.load();
                if word != lola_slot::IN_WRITING && (word & 0xFFFF_FFFF) == 0 {
                    Some((idx, word))
                } else {
                    None
                }
            })
            .collect();
        candidates.sort_by_key(|&(idx, word)| ((word >> 32) as u32, idx));

        for (idx, observed) in candidates {
            if self.slots[idx].try_mark_in_writing(observed).is_ok() {
                self.outstanding_allocations.fetch_add(1, Ordering::AcqRel);
                trace!(slot = idx, "allocated slot for writing");
                return Ok(idx);
            }
        }

        if self.enforce_max_samples {
            warn!("slot allocation failed: no slot available and enforce_max_samples is set");
            return Err(LolaError::SampleAllocationFailure);
        }

        // Overcap: every slot still carries live references and
        // enforce_max_samples is unset, so the producer reuses the slot with
        // the oldest timestamp regardless of refcount instead of failing.
        // Readers already holding a reference into it keep their own
        // acquired copy; they simply won't see it as "newest" again.
        let oldest = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_in_writing())
            .min_by_key(|(idx, slot)| (slot.get_timestamp(), *idx));

        match oldest {
            Some((idx, slot)) => {
                warn!(slot = idx, "overcap: reusing oldest referenced slot (enforce_max_samples unset)");
                slot.mark_in_writing();
                self.outstanding_allocations.fetch_add(1, Ordering::AcqRel);
                Ok(idx)
            }
            None => {
                debug!("slot allocation failed: every slot is in-writing");
                Err(LolaError::SampleAllocationFailure)
            }
        }
    }

    /// Transitions `index` from `IN_WRITING` to `(timestamp, refcount = 0)`.
    pub fn publish_slot(&self, index: usize, timestamp: u32) {
        self.slots[index].set_timestamp(timestamp);
        self.outstanding_allocations.fetch_sub(1, Ordering::AcqRel);
    }

    /// Abandons an allocation without publishing (e.g. on a write error).
    pub fn abandon_slot(&self, index: usize) {
        self.slots[index].mark_invalid();
        self.outstanding_allocations.fetch_sub(1, Ordering::AcqRel);
    }

    /// Consumer-side reference acquisition (spec §4.2): for every slot newer
    /// than `last_seen_ts`, records `begin`, CASes the refcount up, records
    /// `end`. Returns up to `max_n` acquisitions ordered newest-first, ties
    /// broken by ascending slot index; any extra successful acquisitions
    /// beyond `max_n` are released immediately so no reference leaks.
    pub fn acquire_newest(&self, log: &TransactionLog, last_seen_ts: u32, max_n: usize) -> Vec<AcquiredSlot> {
        let mut acquired = Vec::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.is_timestamp_between(last_seen_ts, u32::MAX) {
                continue;
            }
            let observed = slot.load();
            log.set_begin(idx);
            if slot.try_acquire_reference(observed) {
                log.set_end(idx);
                acquired.push(AcquiredSlot { index: idx, timestamp: (observed >> 32) as u32 });
            } else {
                // The CAS lost a race (producer reused the slot, or another
                // reader got there first on a shared log — shouldn't happen
                // for an exclusively-owned log, but stay defensive). Nothing
                // was actually acquired, so the begin bit does not describe
                // a live reference; clear it.
                log.clear(idx);
            }
        }

        acquired.sort_by_key(|a| (std::cmp::Reverse(a.timestamp), a.index));

        if acquired.len() > max_n {
            for extra in &acquired[max_n..] {
                self.release_slot(log, extra.index);
            }
            acquired.truncate(max_n);
        }

        acquired
    }

    /// Releases a held reference: CAS-decrements the refcount and clears the
    /// subscriber's transaction log entry for that slot.
    pub fn release_slot(&self, log: &TransactionLog, index: usize) {
        self.slots[index].release_reference();
        log.clear(index);
    }

    /// Rolls back every stale entry in `log`: for slots with `begin=true`,
    /// decrements the refcount if `end=true` (the increment completed and
    /// must be undone), or leaves the refcount alone if `end=false` (the
    /// increment never completed). Clears both bits either way. After this
    /// call the log is empty and may be unregistered.
    pub fn rollback_transactions(&self, log: &TransactionLog) {
        for idx in 0..log.num_slots() {
            if log.is_begin(idx) {
                if log.is_end(idx) {
                    self.slots[idx].release_reference();
                }
                log.clear(idx);
            }
        }
    }

    /// Snapshot accessors used by tests and by size-estimation callers.
    pub fn slot_timestamp(&self, index: usize) -> u32 {
        self.slots[index].get_timestamp()
    }

    pub fn slot_reference_count(&self, index: usize) -> u32 {
        self.slots[index].get_reference_count()
    }

    pub fn slot_is_in_writing(&self, index: usize) -> bool {
        self.slots[index].is_in_writing()
    }

    pub fn outstanding_allocations(&self) -> usize {
        self.outstanding_allocations.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(ctrl: &EventDataControl, ts: u32) -> usize {
        let idx = ctrl.allocate_slot().unwrap();
        ctrl.publish_slot(idx, ts);
        idx
    }

    #[test]
    fn allocate_then_abandon_leaves_control_unchanged() {
        let ctrl = EventDataControl::new(4, 2, 4, true);
        let idx = ctrl.allocate_slot().unwrap();
        assert!(ctrl.slot_is_in_writing(idx));
        ctrl.abandon_slot(idx);
        assert!(ctrl.slot_timestamp(idx) == 0 && ctrl.slot_reference_count(idx) == 0);
        assert_eq!(ctrl.outstanding_allocations(), 0);
    }

    #[test]
    fn allocation_picks_oldest_timestamp() {
        let ctrl = EventDataControl::new(3, 1, 3, true);
        publish(&ctrl, 10);
        publish(&ctrl, 20);
        publish(&ctrl, 30);

        let idx = ctrl.allocate_slot().unwrap();
        assert_eq!(ctrl.slot_timestamp(idx), 0); // now in-writing
        // the slot chosen must have been the one published at ts=10
        ctrl.publish_slot(idx, 100);
        // Slots published at 20 and 30 remain untouched.
        let remaining: Vec<u32> = (0..3).map(|i| ctrl.slot_timestamp(i)).collect();
        assert!(remaining.contains(&20));
        assert!(remaining.contains(&30));
        assert!(remaining.contains(&100));
        assert!(!remaining.contains(&10));
    }

    #[test]
    fn allocation_fails_when_all_slots_referenced_and_enforced() {
        let ctrl = EventDataControl::new(1, 1, 1, true);
        let idx = publish(&ctrl, 5);
        let log_idx = ctrl.log_set().register_subscriber().unwrap();
        let log = ctrl.log_set().log(log_idx);
        let acquired = ctrl.acquire_newest(log, 0, 1);
        assert_eq!(acquired.len(), 1);
        assert_eq!(acquired[0].index, idx);

        assert!(matches!(ctrl.allocate_slot(), Err(LolaError::SampleAllocationFailure)));
    }

    #[test]
    fn allocation_reuses_oldest_referenced_slot_when_not_enforced() {
        let ctrl = EventDataControl::new(2, 1, 2, false);
        let first = publish(&ctrl, 5);
        let second = publish(&ctrl, 10);

        let log_idx = ctrl.log_set().register_subscriber().unwrap();
        let log = ctrl.log_set().log(log_idx);
        let acquired = ctrl.acquire_newest(log, 0, 2);
        assert_eq!(acquired.len(), 2);
        assert_eq!(ctrl.slot_reference_count(first), 1);
        assert_eq!(ctrl.slot_reference_count(second), 1);

        // Every slot has a live reference, but enforce_max_samples is unset:
        // allocation must still succeed by reusing the oldest slot (`first`).
        let reused = ctrl.allocate_slot().unwrap();
        assert_eq!(reused, first);
        assert!(ctrl.slot_is_in_writing(reused));
    }

    #[test]
    fn acquire_newest_orders_descending_timestamp_ties_by_index() {
        let ctrl = EventDataControl::new(4, 1, 4, true);
        publish(&ctrl, 10);
        publish(&ctrl, 20);
        publish(&ctrl, 20);
        publish(&ctrl, 30);

        let log_idx = ctrl.log_set().register_subscriber().unwrap();
        let log = ctrl.log_set().log(log_idx);
        let acquired = ctrl.acquire_newest(log, 0, 10);
        let timestamps: Vec<u32> = acquired.iter().map(|a| a.timestamp).collect();
        assert_eq!(timestamps, vec![30, 20, 20, 10]);
        // ties at 20 broken by ascending slot index
        assert!(acquired[1].index < acquired[2].index);
    }

    #[test]
    fn acquire_newest_respects_max_n_and_releases_extras() {
        let ctrl = EventDataControl::new(4, 1, 4, true);
        for ts in [10, 20, 30, 40] {
            publish(&ctrl, ts);
        }
        let log_idx = ctrl.log_set().register_subscriber().unwrap();
        let log = ctrl.log_set().log(log_idx);
        let acquired = ctrl.acquire_newest(log, 0, 2);
        assert_eq!(acquired.len(), 2);
        assert_eq!(acquired[0].timestamp, 40);
        assert_eq!(acquired[1].timestamp, 30);

        // The two newer-but-unreturned slots (20, 10 excluded by window; 40,30
        // returned) should have refcount 0 released back; the other two (10,
        // 20) were never acquired in the first place.
        for i in 0..4 {
            if ctrl.slot_timestamp(i) == 40 || ctrl.slot_timestamp(i) == 30 {
                assert_eq!(ctrl.slot_reference_count(i), 1);
            } else {
                assert_eq!(ctrl.slot_reference_count(i), 0);
            }
        }
    }

    #[test]
    fn rollback_after_crash_restores_refcount_and_clears_log() {
        let ctrl = EventDataControl::new(2, 1, 2, true);
        let idx = publish(&ctrl, 30);
        let log_idx = ctrl.log_set().register_subscriber().unwrap();
        let log = ctrl.log_set().log(log_idx);

        let acquired = ctrl.acquire_newest(log, 0, 1);
        assert_eq!(acquired[0].index, idx);
        assert_eq!(ctrl.slot_reference_count(idx), 1);
        assert!(log.is_begin(idx) && log.is_end(idx));

        // Simulate the consumer dying before releasing: rollback should
        // behave exactly as if it had called release_slot.
        ctrl.rollback_transactions(log);
        assert_eq!(ctrl.slot_reference_count(idx), 0);
        assert!(!log.is_begin(idx) && !log.is_end(idx));
        assert!(log.is_empty());

        // The slot is now re-allocatable.
        assert_eq!(ctrl.allocate_slot().unwrap(), idx);
    }

    #[test]
    fn rollback_of_begin_without_end_leaves_refcount_untouched() {
        let ctrl = EventDataControl::new(1, 1, 1, true);
        let idx = publish(&ctrl, 10);
        let log_idx = ctrl.log_set().register_subscriber().unwrap();
        let log = ctrl.log_set().log(log_idx);

        // Simulate a begin that never completed (crash between begin write
        // and the CAS winning).
        log.set_begin(idx);
        ctrl.rollback_transactions(log);
        assert_eq!(ctrl.slot_reference_count(idx), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn next_timestamp_starts_at_one_and_is_monotonic() {
        let ctrl = EventDataControl::new(1, 1, 1, true);
        assert_eq!(ctrl.next_timestamp(), 1);
        assert_eq!(ctrl.next_timestamp(), 2);
        assert_eq!(ctrl.next_timestamp(), 3);
    }
}
