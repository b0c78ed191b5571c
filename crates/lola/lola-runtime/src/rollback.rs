//! Rollback registry: tracks which transaction-log indices still need a
//! crash-recovery rollback pass performed against them, keyed by the event
//! they belong to.
//!
//! Populated by a skeleton or proxy when it detects an abandoned usage
//! marker (see `lola-partial-restart`) for a slot index it doesn't itself
//! own; drained by whichever side next reconnects to that index.

use lola_types::ElementFqId;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct RollbackRegistry {
    pending: Mutex<HashMap<ElementFqId, Vec<usize>>>,
}

impl RollbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `log_index` for `event` as needing rollback.
    pub fn mark_pending(&self, event: ElementFqId, log_index: usize) {
        let mut pending = self.pending.lock().unwrap();
        pending.entry(event).or_default().push(log_index);
    }

    /// Takes and clears every pending index for `event`, for the caller to
    /// run `rollback_transactions` against.
    pub fn take_pending(&self, event: ElementFqId) -> Vec<usize> {
        self.pending.lock().unwrap().remove(&event).unwrap_or_default()
    }

    pub fn has_pending(&self, event: ElementFqId) -> bool {
        self.pending.lock().unwrap().get(&event).is_some_and(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lola_types::{EventId, InstanceId, ServiceId};

    fn event() -> ElementFqId {
        ElementFqId::new(ServiceId(1), InstanceId(1), EventId(1))
    }

    #[test]
    fn mark_then_take_round_trips_and_clears() {
        let registry = RollbackRegistry::new();
        registry.mark_pending(event(), 3);
        registry.mark_pending(event(), 5);
        assert!(registry.has_pending(event()));

        let taken = registry.take_pending(event());
        assert_eq!(taken, vec![3, 5]);
        assert!(!registry.has_pending(event()));
    }

    #[test]
    fn take_on_empty_event_returns_empty_vec() {
        let registry = RollbackRegistry::new();
        assert_eq!(registry.take_pending(event()), Vec::<usize>::new());
    }
}
