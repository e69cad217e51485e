//! # Pending Queue Store
//!
//! One FIFO queue of type-erased messages per message shape. Deferred posts
//! land here; the dispatcher's drain pass takes the whole store and empties
//! it queue by queue.
//!
//! Within a shape, delivery order equals enqueue order. Across shapes, no
//! order is promised; callers must not depend on the interleaving.

use crate::message::MessageKey;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use tracing::trace;

/// Per-shape FIFO queues of messages awaiting the next drain pass.
#[derive(Default)]
pub struct PendingStore {
    queues: HashMap<MessageKey, VecDeque<Rc<dyn Any>>>,
}

impl PendingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to its shape's queue, creating the queue on first
    /// use.
    pub fn enqueue(&mut self, key: MessageKey, message: Rc<dyn Any>) {
        self.queues.entry(key).or_default().push_back(message);
        trace!(message = %key, "message queued for next drain");
    }

    /// Take the entire store, leaving it empty.
    ///
    /// Messages enqueued after this call land in the fresh store and belong
    /// to the next drain pass.
    #[must_use]
    pub fn take_all(&mut self) -> HashMap<MessageKey, VecDeque<Rc<dyn Any>>> {
        std::mem::take(&mut self.queues)
    }

    /// Drop one shape's queue. Returns the number of messages discarded.
    pub fn clear(&mut self, key: MessageKey) -> usize {
        self.queues.remove(&key).map_or(0, |queue| queue.len())
    }

    /// Drop every queue. Returns the number of messages discarded.
    pub fn clear_all(&mut self) -> usize {
        let discarded = self.queues.values().map(VecDeque::len).sum();
        self.queues.clear();
        discarded
    }

    /// Messages currently queued for one shape.
    #[must_use]
    pub fn len(&self, key: MessageKey) -> usize {
        self.queues.get(&key).map_or(0, VecDeque::len)
    }

    /// Messages currently queued across all shapes.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Check whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
