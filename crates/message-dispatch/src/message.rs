//! # Message Types
//!
//! Defines the `Message` trait, the type-indexed `MessageKey`, and the
//! strategy matrix that decides how a posted message travels to its
//! listeners.
//!
//! A message declares its delivery capabilities as associated consts; the
//! dispatcher reads them at post time and never inspects the payload again.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A value that can travel through the dispatcher.
///
/// Implementations declare delivery capabilities by overriding the
/// associated consts; all default to `false`, which selects plain
/// synchronous delivery.
///
/// ```
/// use message_dispatch::Message;
///
/// struct SessionEnded;
///
/// impl Message for SessionEnded {
///     const DEFERRED: bool = true;
///     const BUFFERED: bool = true;
/// }
/// ```
pub trait Message: Any {
    /// Delivery is postponed until the host's next drain call.
    const DEFERRED: bool = false;

    /// Delivered messages are retained and replayed to late subscribers.
    const BUFFERED: bool = false;

    /// Only the first post delivers; later posts are suppressed until the
    /// fire-once state is cleared.
    const FIRE_ONCE: bool = false;
}

/// Stable identifier for a message shape.
///
/// Identity is the `TypeId`: two different message shapes never share one,
/// and the same shape always produces the same one. The type name rides
/// along purely for logging and is excluded from equality and hashing.
#[derive(Clone, Copy)]
pub struct MessageKey {
    id: TypeId,
    name: &'static str,
}

impl MessageKey {
    /// Get the key for a message shape.
    #[must_use]
    pub fn of<M: Message>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: type_name::<M>(),
        }
    }

    /// The message shape's type name (for logs and diagnostics only).
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for MessageKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageKey {}

impl Hash for MessageKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageKey").field(&self.name).finish()
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// How a posted message reaches its listeners.
///
/// This four-way matrix is the dispatcher's central routing decision:
///
/// | Deferred | Buffered | Strategy |
/// |----------|----------|----------|
/// | no | no | deliver synchronously at post |
/// | yes | no | queue, deliver at the next drain |
/// | no | yes | deliver synchronously, then record for replay |
/// | yes | yes | queue now, record at drain time, then deliver |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStrategy {
    /// Synchronous delivery at post time, nothing retained.
    Immediate,
    /// Queued per type, delivered on the next drain pass.
    Deferred,
    /// Synchronous delivery, then recorded for late-subscriber replay.
    Buffered,
    /// Queued now; recorded for replay only once actually delivered.
    DeferredBuffered,
}

impl DeliveryStrategy {
    /// Select the strategy for a message shape from its capability tags.
    #[must_use]
    pub fn for_message<M: Message>() -> Self {
        Self::select(M::DEFERRED, M::BUFFERED)
    }

    /// Select the strategy from raw capability flags.
    #[must_use]
    pub const fn select(deferred: bool, buffered: bool) -> Self {
        match (deferred, buffered) {
            (false, false) => Self::Immediate,
            (true, false) => Self::Deferred,
            (false, true) => Self::Buffered,
            (true, true) => Self::DeferredBuffered,
        }
    }
}
