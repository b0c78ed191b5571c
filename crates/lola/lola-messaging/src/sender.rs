//! Senders: the blocking OS-queue stand-in, and the non-blocking wrapper
//! that mixed-criticality policy requires around it.
//!
//! It makes no sense to wrap a sender that already guarantees non-blocking
//! behaviour — [`NonBlockingSender`] exists only to protect an ASIL-B
//! process from ever being blocked by a QM peer's slow or stuck receiver.

use crate::message::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{trace, warn};

/// Upper bound on a `NonBlockingSender`'s configured ring size. Exceeding it
/// at construction is a fatal configuration error, not a runtime condition.
pub const QUEUE_SIZE_UPPER_LIMIT: usize = 100;

/// A transient send failure: the message was not delivered, but the caller
/// may retry. Never returned for a reason that requires blocking to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("send queue is temporarily full")]
    ResourceTemporarilyUnavailable,
    #[error("peer is no longer reachable")]
    Disconnected,
}

/// Common interface for anything that can deliver a [`Message`] to one peer.
pub trait Sender: Send + Sync {
    fn send(&self, message: Message) -> Result<(), SendError>;

    /// Whether this sender itself guarantees `send` never blocks the
    /// caller. A bare [`BlockingSender`] does not; a [`NonBlockingSender`]
    /// always does (that's the entire point of it).
    fn has_non_blocking_guarantee(&self) -> bool;
}

/// A direct stand-in for an OS message queue sender: a bounded channel
/// whose `send` blocks the caller once the peer's queue is full. This is
/// the "underlying ISender implementation" that the non-blocking wrapper
/// protects ASIL-B callers from.
pub struct BlockingSender {
    tx: SyncSender<Message>,
}

impl BlockingSender {
    pub fn new(tx: SyncSender<Message>) -> Self {
        Self { tx }
    }
}

impl Sender for BlockingSender {
    fn send(&self, message: Message) -> Result<(), SendError> {
        self.tx.send(message).map_err(|_| SendError::Disconnected)
    }

    fn has_non_blocking_guarantee(&self) -> bool {
        false
    }
}

struct DispatchQueue {
    items: Mutex<VecDeque<Message>>,
    not_empty: Condvar,
}

/// Wraps any [`Sender`] to guarantee its `send` never blocks the caller.
///
/// Messages are enqueued into a bounded in-process ring buffer and drained
/// by a single dispatcher thread that calls the wrapped sender's (possibly
/// blocking) `send` one message at a time. When the ring is full, `send`
/// fails immediately with [`SendError::ResourceTemporarilyUnavailable`]
/// instead of blocking the caller.
pub struct NonBlockingSender {
    queue: Arc<DispatchQueue>,
    capacity: usize,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl NonBlockingSender {
    /// `max_queue_size` must not exceed [`QUEUE_SIZE_UPPER_LIMIT`]; the
    /// caller is expected to have validated deployment configuration before
    /// reaching here, so this is a panic (a programming/config error), not a
    /// recoverable `Result`.
    pub fn new(wrapped: Box<dyn Sender>, max_queue_size: usize) -> Self {
        assert!(
            max_queue_size <= QUEUE_SIZE_UPPER_LIMIT,
            "non-blocking sender queue size {max_queue_size} exceeds upper limit {QUEUE_SIZE_UPPER_LIMIT}"
        );

        let queue = Arc::new(DispatchQueue {
            items: Mutex::new(VecDeque::with_capacity(max_queue_size)),
            not_empty: Condvar::new(),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || dispatch_loop(queue, stop, wrapped))
        };

        Self { queue, capacity: max_queue_size, stop, worker: Some(worker) }
    }
}

fn dispatch_loop(queue: Arc<DispatchQueue>, stop: Arc<AtomicBool>, wrapped: Box<dyn Sender>) {
    loop {
        let message = {
            let mut items = queue.items.lock().unwrap();
            loop {
                if let Some(msg) = items.pop_front() {
                    break Some(msg);
                }
                if stop.load(Ordering::Acquire) {
                    return;
                }
                let (guard, timed_out) =
                    queue.not_empty.wait_timeout(items, Duration::from_millis(50)).unwrap();
                items = guard;
                if timed_out.timed_out() && items.is_empty() && stop.load(Ordering::Acquire) {
                    return;
                }
            }
        };
        if let Some(message) = message {
            if let Err(e) = wrapped.send(message) {
                trace!(?e, "non-blocking sender: deferred dispatch failed");
            }
        }
    }
}

impl Sender for NonBlockingSender {
    fn send(&self, message: Message) -> Result<(), SendError> {
        let mut items = self.queue.items.lock().unwrap();
        if items.len() >= self.capacity {
            warn!(capacity = self.capacity, "non-blocking sender ring full, dropping send request");
            return Err(SendError::ResourceTemporarilyUnavailable);
        }
        items.push_back(message);
        self.queue.not_empty.notify_one();
        Ok(())
    }

    fn has_non_blocking_guarantee(&self) -> bool {
        true
    }
}

impl Drop for NonBlockingSender {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.queue.not_empty.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Builds a bounded `(BlockingSender, Receiver)` pair standing in for an OS
/// message queue of the given capacity.
pub fn blocking_channel(capacity: usize) -> (BlockingSender, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (BlockingSender::new(tx), rx)
}
