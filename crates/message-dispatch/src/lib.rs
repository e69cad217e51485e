//! # Message Dispatch - In-Process Publish/Subscribe Bus
//!
//! A single-threaded message bus with four delivery strategies selected by
//! capability tags on the message type: instantaneous, deferred to the next
//! tick, buffered for late subscribers, and deferred-then-buffered. A
//! fire-once message class suppresses repeat posts, and per-owner local
//! dispatchers receive forwarded messages without the forwarder knowing who
//! owns them.
//!
//! ## Dispatch Flow
//!
//! ```text
//! ┌──────────────┐   post()                      ┌──────────────┐
//! │   Producer   │ ────────┐                     │  Listeners   │
//! └──────────────┘         ▼                     └──────────────┘
//!                  ┌──────────────┐   immediate        ▲
//!                  │  Dispatcher  │ ───────────────────┤
//!                  │              │   deferred    ┌────┴─────┐
//!                  │  strategy    │ ────────────▶ │ pending  │─ drain ─▶
//!                  │  selection   │   buffered    ├──────────┤
//!                  │              │ ────────────▶ │ history  │─ replay ─▶
//!                  └──────────────┘               └──────────┘
//! ```
//!
//! ## Threading
//!
//! There is no internal threading or locking: every operation runs
//! synchronously on the calling thread, and the types are `!Send + !Sync`
//! by construction. The host drives deferred delivery by calling
//! [`MessageDispatcher::drain_pending`] once per logical tick.
//!
//! ## Lifecycle
//!
//! Buffered history grows until explicitly cleared, and local-dispatch
//! bindings are non-owning; both are caller obligations, documented on
//! [`BufferedStore`](buffered::BufferedStore) and
//! [`LocalDispatchTable`](local::LocalDispatchTable).

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod buffered;
pub mod dispatcher;
pub mod fire_once;
pub mod local;
pub mod message;
pub mod pending;
pub mod registry;

// Re-export main types
pub use dispatcher::{DispatchConfig, DrainError, MessageDispatcher, PostOutcome};
pub use local::OwnerId;
pub use message::{DeliveryStrategy, Message, MessageKey};
pub use registry::ListenerId;

/// Buffered-history size at which one message shape's history logs a
/// warning (observability only, never truncation).
pub const DEFAULT_BUFFERED_WARN_THRESHOLD: usize = 1024;
