//! # Buffered Message Store
//!
//! Retains delivered buffered messages per shape so that listeners added
//! later can be replayed the full history, in recording order, at subscribe
//! time.
//!
//! The store grows without bound until explicitly cleared; lifecycle is the
//! caller's obligation. A configurable threshold emits a warning when one
//! shape's history crosses it — an observability aid, never truncation.
//!
//! Also home to the deferred-buffer set: messages posted deferred+buffered
//! are not recorded here at post time, because buffering only happens once
//! the message is actually delivered. The set tracks that owed buffering
//! between post and drain.

use crate::message::MessageKey;
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{trace, warn};

/// Message identity is `Rc` pointer identity, the in-process rendering of
/// reference equality.
fn same_payload(a: &Rc<dyn Any>, b: &Rc<dyn Any>) -> bool {
    std::ptr::eq(Rc::as_ptr(a).cast::<()>(), Rc::as_ptr(b).cast::<()>())
}

/// Per-shape ordered history of delivered buffered messages.
pub struct BufferedStore {
    history: HashMap<MessageKey, Vec<Rc<dyn Any>>>,
    warn_threshold: usize,
}

impl BufferedStore {
    /// Create an empty store warning when one shape's history crosses
    /// `warn_threshold` entries.
    #[must_use]
    pub fn new(warn_threshold: usize) -> Self {
        Self {
            history: HashMap::new(),
            warn_threshold,
        }
    }

    /// Append a delivered message to its shape's history.
    pub fn record(&mut self, key: MessageKey, message: Rc<dyn Any>) {
        let history = self.history.entry(key).or_default();
        history.push(message);
        if history.len() == self.warn_threshold {
            warn!(
                message = %key,
                buffered = history.len(),
                "buffered history reached the warn threshold; \
                 callers own buffered-message lifecycle"
            );
        }
        trace!(message = %key, "message recorded for late-subscriber replay");
    }

    /// Snapshot one shape's history in recording order.
    #[must_use]
    pub fn snapshot(&self, key: MessageKey) -> Vec<Rc<dyn Any>> {
        self.history.get(&key).cloned().unwrap_or_default()
    }

    /// Remove the first history entry matching `message` by identity.
    ///
    /// Returns `true` if an entry was removed; an emptied history deletes
    /// its map entry.
    pub fn remove_first(&mut self, key: MessageKey, message: &Rc<dyn Any>) -> bool {
        let Some(history) = self.history.get_mut(&key) else {
            return false;
        };
        let Some(index) = history.iter().position(|m| same_payload(m, message)) else {
            return false;
        };
        history.remove(index);
        if history.is_empty() {
            self.history.remove(&key);
        }
        true
    }

    /// Check whether `message` is recorded for `key`, by identity.
    #[must_use]
    pub fn contains(&self, key: MessageKey, message: &Rc<dyn Any>) -> bool {
        self.history
            .get(&key)
            .is_some_and(|history| history.iter().any(|m| same_payload(m, message)))
    }

    /// Drop one shape's history. Returns the number of entries discarded.
    pub fn clear(&mut self, key: MessageKey) -> usize {
        self.history.remove(&key).map_or(0, |history| history.len())
    }

    /// Drop every history. Returns the number of entries discarded.
    pub fn clear_all(&mut self) -> usize {
        let discarded = self.history.values().map(Vec::len).sum();
        self.history.clear();
        discarded
    }

    /// Entries recorded for one shape.
    #[must_use]
    pub fn len(&self, key: MessageKey) -> usize {
        self.history.get(&key).map_or(0, Vec::len)
    }

    /// Check whether no history is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Messages posted deferred+buffered whose buffering is still owed.
///
/// An entry lives from post until the drain pass delivers the message (and
/// records it), or until the message is removed or cleared first. Removal
/// from this set suppresses the buffering step, not delivery.
#[derive(Default)]
pub struct DeferredBufferSet {
    entries: Vec<(MessageKey, Rc<dyn Any>)>,
}

impl DeferredBufferSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message whose buffering is owed at drain time.
    pub fn insert(&mut self, key: MessageKey, message: Rc<dyn Any>) {
        self.entries.push((key, message));
    }

    /// Remove `message` from the set if present, by identity.
    ///
    /// Returns `true` if it was present — the drain pass uses this as "the
    /// buffering step is still owed".
    pub fn take(&mut self, message: &Rc<dyn Any>) -> bool {
        let Some(index) = self
            .entries
            .iter()
            .position(|(_, m)| same_payload(m, message))
        else {
            return false;
        };
        self.entries.remove(index);
        true
    }

    /// Check membership by identity, without removing.
    #[must_use]
    pub fn contains(&self, message: &Rc<dyn Any>) -> bool {
        self.entries.iter().any(|(_, m)| same_payload(m, message))
    }

    /// Drop all entries for one shape. Returns the number discarded.
    pub fn clear_key(&mut self, key: MessageKey) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| *k != key);
        before - self.entries.len()
    }

    /// Drop every entry.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Entries currently owed buffering.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no buffering is owed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
