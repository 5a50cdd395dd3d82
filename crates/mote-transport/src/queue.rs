//! Outbound datagram queue with a single-writer hand-off.
//!
//! Producers push and then try to claim the writer role; whoever claims it
//! drains the queue. The writer gives the role back only after observing an
//! empty queue, and then re-checks: an item that lands between "queue was
//! empty" and "writer released" is picked up either by the old writer
//! reclaiming the role or by the producer that pushed it. Never by both,
//! never by neither.

use std::sync::atomic::{AtomicBool, Ordering, fence};

use crossbeam_queue::SegQueue;

use crate::endpoint::Endpoint;

/// A payload waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundItem {
    /// Bytes to send, unmodified
    pub payload: Vec<u8>,
    /// Where to send them
    pub destination: Endpoint,
}

/// FIFO of outbound items plus the writer-active flag.
#[derive(Debug, Default)]
pub struct SendQueue {
    items: SegQueue<OutboundItem>,
    writing: AtomicBool,
}

impl SendQueue {
    /// Create an empty queue with no active writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item.
    pub fn push(&self, item: OutboundItem) {
        self.items.push(item);
        fence(Ordering::SeqCst);
    }

    /// Claim the writer role. Returns `true` if the caller must now drain.
    pub fn try_acquire_writer(&self) -> bool {
        self.writing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Next item for the active writer.
    ///
    /// Returns `None` once the queue is empty and the writer role has been
    /// released. Must only be called by the current writer.
    pub fn next_or_release(&self) -> Option<OutboundItem> {
        loop {
            if let Some(item) = self.items.pop() {
                return Some(item);
            }

            self.release_writer();
            fence(Ordering::SeqCst);

            if self.items.is_empty() || !self.try_acquire_writer() {
                return None;
            }
        }
    }

    /// Give up the writer role without draining.
    pub fn release_writer(&self) {
        let _ = self
            .writing
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Whether a writer is currently draining.
    #[must_use]
    pub fn is_writing(&self) -> bool {
        self.writing.load(Ordering::SeqCst)
    }

    /// Drop every queued item, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut discarded = 0;
        while self.items.pop().is_some() {
            discarded += 1;
        }
        discarded
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
