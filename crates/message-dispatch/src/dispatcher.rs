//! # Message Dispatcher
//!
//! The facade combining the listener registry, the fire-once tracker, the
//! pending and buffered stores, and the local dispatch table behind one
//! posting surface.
//!
//! ## Strategy selection
//!
//! `post` reads the message's capability tags and routes it:
//!
//! - neither tag: deliver synchronously, retain nothing
//! - `DEFERRED`: queue; the host's next [`MessageDispatcher::drain_pending`]
//!   call delivers it
//! - `BUFFERED`: deliver synchronously, then record for late-subscriber
//!   replay
//! - both: queue now; the drain pass records it for replay immediately
//!   before delivering it, so a listener subscribed from inside a handler
//!   sees a consistent history
//!
//! ## Threading
//!
//! Single-threaded, cooperative. State lives in `RefCell`s and methods take
//! `&self`, so handlers may freely re-enter the dispatcher — post, add or
//! remove listeners, clear stores — while a dispatch is in progress; chains
//! are snapshotted before iteration. The pervasive `Rc`/`RefCell` make the
//! type `!Send + !Sync`: concurrent use does not compile. The one guarded
//! reentry is draining from inside a drain pass, which returns
//! [`DrainError::ReentrantDrain`].
//!
//! ## Faults
//!
//! Handler panics propagate to the poster. The dispatcher performs no
//! rollback and no retry; a panic mid-drain abandons the remainder of that
//! pass's batch. Handler correctness is a listener's own responsibility.

use crate::buffered::{BufferedStore, DeferredBufferSet};
use crate::fire_once::FireOnceTracker;
use crate::local::{LocalDispatchTable, OwnerId};
use crate::message::{DeliveryStrategy, Message, MessageKey};
use crate::pending::PendingStore;
use crate::registry::{AnyCallback, ListenerId, ListenerRegistry, TypedCallback};
use crate::DEFAULT_BUFFERED_WARN_THRESHOLD;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors from the drain operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DrainError {
    /// A handler invoked during a drain pass called drain again.
    #[error("drain requested while a drain pass is already running")]
    ReentrantDrain,
}

/// What happened to a posted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// Delivered synchronously to this many handlers (possibly zero).
    Delivered(usize),
    /// Queued for the next drain pass.
    Queued,
    /// Suppressed by fire-once tracking; no side effects.
    Suppressed,
}

/// Dispatcher construction knobs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Label attached to this dispatcher's log lines. Useful when a process
    /// hosts one global dispatcher and many local ones.
    pub label: String,
    /// Buffered-history size at which one shape's history logs a warning.
    pub buffered_warn_threshold: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            label: "main".to_string(),
            buffered_warn_threshold: DEFAULT_BUFFERED_WARN_THRESHOLD,
        }
    }
}

/// In-process message bus with deferred, buffered, and fire-once delivery.
///
/// Each instance is an independent unit of state; a process may host many
/// (one global, many local, bound via [`MessageDispatcher::register_local`]).
/// Construction is plain — any singleton wiring belongs to the host.
pub struct MessageDispatcher {
    config: DispatchConfig,
    listeners: RefCell<ListenerRegistry>,
    fired: RefCell<FireOnceTracker>,
    pending: RefCell<PendingStore>,
    buffered: RefCell<BufferedStore>,
    deferred_buffer: RefCell<DeferredBufferSet>,
    local: RefCell<LocalDispatchTable>,
    next_listener_id: Cell<u64>,
    draining: Cell<bool>,
    messages_posted: Cell<u64>,
    messages_delivered: Cell<u64>,
}

/// Clears the draining flag even when a handler panic unwinds the pass.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl MessageDispatcher {
    /// Create a dispatcher with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    /// Create a dispatcher with explicit configuration.
    #[must_use]
    pub fn with_config(config: DispatchConfig) -> Self {
        let buffered = BufferedStore::new(config.buffered_warn_threshold);
        Self {
            config,
            listeners: RefCell::new(ListenerRegistry::new()),
            fired: RefCell::new(FireOnceTracker::new()),
            pending: RefCell::new(PendingStore::new()),
            buffered: RefCell::new(buffered),
            deferred_buffer: RefCell::new(DeferredBufferSet::new()),
            local: RefCell::new(LocalDispatchTable::new()),
            next_listener_id: Cell::new(0),
            draining: Cell::new(false),
            messages_posted: Cell::new(0),
            messages_delivered: Cell::new(0),
        }
    }

    /// This dispatcher's log label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.config.label
    }

    // =========================================================================
    // LISTENER REGISTRATION
    // =========================================================================

    /// Add a statically-typed listener for messages of shape `M`.
    ///
    /// If `M` already has buffered history, the new listener is replayed the
    /// full history, in recording order, before this call returns — a late
    /// subscriber observes a consistent prefix with no gap before live
    /// messages start arriving.
    pub fn add_listener<M, F>(&self, handler: F) -> ListenerId
    where
        M: Message,
        F: Fn(&M) + 'static,
    {
        let key = MessageKey::of::<M>();
        let id = self.next_id();
        let callback: Rc<TypedCallback> = Rc::new(move |payload: &dyn Any| {
            if let Some(message) = payload.downcast_ref::<M>() {
                handler(message);
            }
        });
        self.listeners
            .borrow_mut()
            .add_typed(key, id, Rc::clone(&callback));
        debug!(dispatcher = %self.config.label, message = %key, "listener added");

        self.replay_history(key, |payload| (*callback)(payload));
        id
    }

    /// Add a runtime-typed listener for messages of shape `key`.
    ///
    /// The handler receives the key plus the type-erased payload. Matching
    /// is exact: no wildcard or subtype delivery. Buffered history is
    /// replayed exactly as for [`MessageDispatcher::add_listener`].
    pub fn add_any_listener<F>(&self, key: MessageKey, handler: F) -> ListenerId
    where
        F: Fn(MessageKey, &dyn Any) + 'static,
    {
        let id = self.next_id();
        let callback: Rc<AnyCallback> = Rc::new(handler);
        self.listeners
            .borrow_mut()
            .add_any(key, id, Rc::clone(&callback));
        debug!(dispatcher = %self.config.label, message = %key, "runtime-typed listener added");

        self.replay_history(key, |payload| (*callback)(key, payload));
        id
    }

    /// Remove one listener. Removing an id that was never added (or was
    /// already removed) is a no-op returning `false`.
    pub fn remove_listener(&self, key: MessageKey, id: ListenerId) -> bool {
        self.listeners.borrow_mut().remove(key, id)
    }

    /// Remove every listener for every shape.
    pub fn remove_all_listeners(&self) {
        self.listeners.borrow_mut().remove_all();
        debug!(dispatcher = %self.config.label, "all listeners removed");
    }

    // =========================================================================
    // POSTING
    // =========================================================================

    /// Post a message, routing by its capability tags.
    pub fn post<M: Message>(&self, message: M) -> PostOutcome {
        self.post_shared(Rc::new(message))
    }

    /// Post a message the caller keeps a handle to.
    ///
    /// The shared handle is what later identity queries
    /// ([`MessageDispatcher::remove_buffered_message`],
    /// [`MessageDispatcher::is_buffered`]) compare against.
    pub fn post_shared<M: Message>(&self, message: Rc<M>) -> PostOutcome {
        let key = MessageKey::of::<M>();
        self.messages_posted.set(self.messages_posted.get() + 1);

        if self
            .fired
            .borrow_mut()
            .check_and_mark(key, M::FIRE_ONCE)
        {
            debug!(dispatcher = %self.config.label, message = %key, "post suppressed: fire-once already sent");
            return PostOutcome::Suppressed;
        }

        let payload: Rc<dyn Any> = message;
        match DeliveryStrategy::select(M::DEFERRED, M::BUFFERED) {
            DeliveryStrategy::Immediate => {
                let receivers = self.deliver(key, &payload);
                if receivers == 0 {
                    debug!(dispatcher = %self.config.label, message = %key, "message dropped (no listeners)");
                }
                PostOutcome::Delivered(receivers)
            }
            DeliveryStrategy::Deferred => {
                self.pending.borrow_mut().enqueue(key, payload);
                PostOutcome::Queued
            }
            DeliveryStrategy::Buffered => {
                let receivers = self.deliver(key, &payload);
                self.buffered.borrow_mut().record(key, payload);
                PostOutcome::Delivered(receivers)
            }
            DeliveryStrategy::DeferredBuffered => {
                self.deferred_buffer
                    .borrow_mut()
                    .insert(key, Rc::clone(&payload));
                self.pending.borrow_mut().enqueue(key, payload);
                PostOutcome::Queued
            }
        }
    }

    /// Deliver every pending message; the host calls this once per tick.
    ///
    /// Each shape's queue is fully drained, in enqueue order, before the
    /// next shape's; the order between shapes is unspecified. Messages
    /// enqueued by handlers during the pass belong to the next pass, so a
    /// handler that re-posts cannot starve the calling tick. Returns the
    /// number of messages delivered.
    ///
    /// # Errors
    ///
    /// [`DrainError::ReentrantDrain`] if called from a handler that is
    /// itself running inside a drain pass; no store is touched.
    pub fn drain_pending(&self) -> Result<usize, DrainError> {
        if self.draining.get() {
            warn!(dispatcher = %self.config.label, "reentrant drain rejected");
            return Err(DrainError::ReentrantDrain);
        }
        self.draining.set(true);
        let _guard = DrainGuard(&self.draining);

        let batch = self.pending.borrow_mut().take_all();
        let mut drained = 0usize;
        for (key, mut queue) in batch {
            debug_assert!(!queue.is_empty(), "pending queues are created non-empty");
            while let Some(payload) = queue.pop_front() {
                // Buffer-then-deliver: a handler that subscribes as a side
                // effect of this delivery must already see the message in
                // the replay history.
                if self.deferred_buffer.borrow_mut().take(&payload) {
                    self.buffered.borrow_mut().record(key, Rc::clone(&payload));
                }
                self.deliver(key, &payload);
                drained += 1;
            }
        }
        debug!(dispatcher = %self.config.label, drained, "drain pass complete");
        Ok(drained)
    }

    /// Synchronous delivery core: typed chain first, then runtime-typed,
    /// each in registration order. Chains are snapshotted, so listener
    /// mutation from inside a handler affects the next dispatch, not this
    /// one. Returns the number of handlers invoked.
    fn deliver(&self, key: MessageKey, payload: &Rc<dyn Any>) -> usize {
        let mut invoked = 0usize;

        let typed = self.listeners.borrow().typed_snapshot(key);
        for callback in typed {
            (*callback)(payload.as_ref());
            invoked += 1;
        }

        let any = self.listeners.borrow().any_snapshot(key);
        for callback in any {
            (*callback)(key, payload.as_ref());
            invoked += 1;
        }

        self.messages_delivered
            .set(self.messages_delivered.get() + invoked as u64);
        trace!(dispatcher = %self.config.label, message = %key, receivers = invoked, "message delivered");
        invoked
    }

    /// Replay buffered history for `key` to one freshly added listener.
    fn replay_history(&self, key: MessageKey, invoke: impl Fn(&dyn Any)) {
        let history = self.buffered.borrow().snapshot(key);
        if history.is_empty() {
            return;
        }
        debug!(dispatcher = %self.config.label, message = %key, replayed = history.len(),
               "replaying buffered history to new listener");
        for payload in &history {
            invoke(payload.as_ref());
        }
        self.messages_delivered
            .set(self.messages_delivered.get() + history.len() as u64);
    }

    // =========================================================================
    // LOCAL DISPATCH
    // =========================================================================

    /// Forward a message to the sub-dispatcher bound to `owner`.
    ///
    /// Returns `None` — silently, this is not an error — when no live
    /// dispatcher is bound to that owner; otherwise the sub-dispatcher's
    /// post outcome.
    pub fn forward<M: Message>(&self, owner: OwnerId, message: M) -> Option<PostOutcome> {
        self.forward_shared(owner, Rc::new(message))
    }

    /// Forward a message the caller keeps a handle to. See
    /// [`MessageDispatcher::forward`].
    pub fn forward_shared<M: Message>(&self, owner: OwnerId, message: Rc<M>) -> Option<PostOutcome> {
        let Some(target) = self.local.borrow().resolve(owner) else {
            debug!(dispatcher = %self.config.label, owner = %owner, "forward skipped (owner not bound)");
            return None;
        };
        Some(target.post_shared(message))
    }

    /// Bind `owner` to a sub-dispatcher. The binding is non-owning; the
    /// owner must unregister before dropping the sub-dispatcher, or later
    /// forwards to it silently no-op.
    pub fn register_local(&self, owner: OwnerId, dispatcher: &Rc<MessageDispatcher>) {
        self.local
            .borrow_mut()
            .register(owner, Rc::downgrade(dispatcher));
    }

    /// Remove an owner's binding. Returns `true` if one existed.
    pub fn unregister_local(&self, owner: OwnerId) -> bool {
        self.local.borrow_mut().unregister(owner)
    }

    /// Drop bindings whose sub-dispatcher has been dropped without
    /// unregistering. Returns the number removed.
    pub fn prune_local(&self) -> usize {
        self.local.borrow_mut().prune()
    }

    // =========================================================================
    // CLEARING
    // =========================================================================

    /// Reset fire-once tracking only: every fire-once shape may fire again.
    /// Pending queues, buffered history, and listeners are untouched.
    pub fn clear_fired_messages(&self) {
        self.fired.borrow_mut().clear_all();
        debug!(dispatcher = %self.config.label, "fire-once records cleared");
    }

    /// Clear every trace of one shape: its pending queue, its buffered
    /// history, its fire-once record, and any owed buffering. Listeners for
    /// the shape are untouched.
    pub fn clear_messages_of(&self, key: MessageKey) {
        let pending = self.pending.borrow_mut().clear(key);
        let buffered = self.buffered.borrow_mut().clear(key);
        self.deferred_buffer.borrow_mut().clear_key(key);
        self.fired.borrow_mut().clear(key);
        debug!(dispatcher = %self.config.label, message = %key, pending, buffered,
               "per-shape message state cleared");
    }

    /// Discard every pending queue (and the owed-buffering entries of the
    /// discarded messages — once unqueued they can never be buffered).
    /// Buffered history and fire-once records are untouched.
    pub fn clear_pending_messages(&self) {
        let discarded = self.pending.borrow_mut().clear_all();
        self.deferred_buffer.borrow_mut().clear_all();
        debug!(dispatcher = %self.config.label, discarded, "pending messages cleared");
    }

    /// Remove one buffered message by identity.
    ///
    /// If the message was posted deferred+buffered and has not drained yet,
    /// its owed-buffering entry is removed instead: the next drain still
    /// delivers the message but skips recording it. Returns `true` if
    /// anything was removed.
    pub fn remove_buffered_message<M: Message>(&self, message: &Rc<M>) -> bool {
        let key = MessageKey::of::<M>();
        let payload: Rc<dyn Any> = message.clone();
        if self.deferred_buffer.borrow_mut().take(&payload) {
            debug!(dispatcher = %self.config.label, message = %key,
                   "owed buffering cancelled (message still pending)");
            return true;
        }
        self.buffered.borrow_mut().remove_first(key, &payload)
    }

    /// Full reset: pending queues, buffered history, fire-once records, and
    /// owed buffering all cleared together. Listener registrations and
    /// local bindings survive.
    pub fn reset(&self) {
        let pending = self.pending.borrow_mut().clear_all();
        let buffered = self.buffered.borrow_mut().clear_all();
        self.deferred_buffer.borrow_mut().clear_all();
        self.fired.borrow_mut().clear_all();
        debug!(dispatcher = %self.config.label, pending, buffered, "dispatcher reset");
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Listeners registered for a shape, across both chains.
    #[must_use]
    pub fn listener_count(&self, key: MessageKey) -> usize {
        self.listeners.borrow().listener_count(key)
    }

    /// Messages currently queued for a shape.
    #[must_use]
    pub fn pending_count(&self, key: MessageKey) -> usize {
        self.pending.borrow().len(key)
    }

    /// Messages currently buffered for a shape.
    #[must_use]
    pub fn buffered_count(&self, key: MessageKey) -> usize {
        self.buffered.borrow().len(key)
    }

    /// Check whether a message is in the buffered history, by identity.
    ///
    /// A deferred+buffered message reports `false` until the drain pass
    /// that delivers it records it.
    #[must_use]
    pub fn is_buffered<M: Message>(&self, message: &Rc<M>) -> bool {
        let payload: Rc<dyn Any> = message.clone();
        self.buffered
            .borrow()
            .contains(MessageKey::of::<M>(), &payload)
    }

    /// Total posts attempted, including suppressed ones.
    #[must_use]
    pub fn messages_posted(&self) -> u64 {
        self.messages_posted.get()
    }

    /// Total handler invocations, live and replayed.
    #[must_use]
    pub fn messages_delivered(&self) -> u64 {
        self.messages_delivered.get()
    }

    fn next_id(&self) -> ListenerId {
        let id = self.next_listener_id.get();
        self.next_listener_id.set(id + 1);
        ListenerId(id)
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
