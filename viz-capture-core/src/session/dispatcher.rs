use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;

use crate::models::chunk::EmittedChunk;
use crate::traits::chunk_observer::ChunkObserver;

/// Identifies one subscription for `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Fire-and-forget fan-out of emitted chunks.
///
/// Every subscriber sits behind a bounded channel and gets `try_send`, so
/// dispatch never waits on a consumer and drops the chunk when the queue is
/// full. Closure observers run on their own drain thread, never on the
/// capture thread; a panicking observer is logged and keeps receiving.
pub struct EmissionDispatcher {
    subscribers: RwLock<Vec<(SubscriptionId, Sender<EmittedChunk>)>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl EmissionDispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Run `observer` on a dedicated thread fed by a queue of `capacity`
    /// chunks.
    ///
    /// The thread exits once the subscription is removed and its queue has
    /// drained.
    pub fn subscribe(&self, observer: Arc<dyn ChunkObserver>, capacity: usize) -> SubscriptionId {
        let id = self.allocate_id();
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));

        let spawned = thread::Builder::new()
            .name(format!("chunk-observer-{}", id.0))
            .spawn(move || drain_observer(id, observer, rx));
        if let Err(e) = spawned {
            // The receiver went down with the closure; the next dispatch
            // prunes this subscription.
            log::error!("Failed to spawn thread for chunk observer {:?}: {}", id, e);
        }

        self.insert(id, tx)
    }

    /// Subscribe through a bounded channel of `capacity` chunks.
    ///
    /// Dropping the receiver unsubscribes on the next dispatch.
    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriptionId, Receiver<EmittedChunk>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let id = self.allocate_id();
        (self.insert(id, tx), rx)
    }

    /// Returns whether a subscriber was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Chunks dropped because a subscriber's queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_counters(&self) {
        self.dropped.store(0, Ordering::Relaxed);
    }

    /// Deliver `chunk` to every subscriber. Must not be called with the
    /// session lock held.
    pub fn dispatch(&self, chunk: EmittedChunk) {
        let snapshot = self.subscribers.read().clone();
        if snapshot.is_empty() {
            return;
        }

        let mut disconnected = Vec::new();
        for (id, tx) in &snapshot {
            match tx.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
            }
        }

        if !disconnected.is_empty() {
            log::debug!("Removing {} disconnected chunk subscriber(s)", disconnected.len());
            self.subscribers
                .write()
                .retain(|(id, _)| !disconnected.contains(id));
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, id: SubscriptionId, tx: Sender<EmittedChunk>) -> SubscriptionId {
        self.subscribers.write().push((id, tx));
        id
    }
}

fn drain_observer(
    id: SubscriptionId,
    observer: Arc<dyn ChunkObserver>,
    rx: Receiver<EmittedChunk>,
) {
    for chunk in rx {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            observer.on_chunk(&chunk.samples, chunk.sample_rate)
        }));
        if result.is_err() {
            log::warn!("Chunk observer {:?} panicked; chunk skipped for it", id);
        }
    }
    log::debug!("Chunk observer {:?} detached", id);
}

impl Default for EmissionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
