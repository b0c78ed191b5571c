//! Event data control and storage: the lock-free single-writer/many-reader
//! slot allocation and reference-counting discipline, and the per-subscriber
//! transaction logs that make crash recovery of stale references possible.

mod control;
mod transaction_log;

pub use control::{AcquiredSlot, EventDataControl};
pub use transaction_log::{TransactionLog, TransactionLogSet};
