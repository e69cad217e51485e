//! # Local Dispatch Table
//!
//! Associates owner identities with their own sub-dispatcher instances so a
//! forwarder can route a message to "whoever owns this id" without knowing
//! who that is downstream.
//!
//! ## Ownership
//!
//! The table is deliberately non-owning: bindings hold `Weak` references
//! and never extend a sub-dispatcher's lifetime. Owners must unregister
//! before they go away; a stale binding is not an error, it just makes
//! later forwards silent no-ops. Identity tokens are random UUIDs, so
//! recycled owners get fresh ids and stale keys cannot collide.

use crate::dispatcher::MessageDispatcher;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};
use uuid::Uuid;

/// Stable identity token for the owner of a local dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Mint a fresh owner identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Non-owning owner-to-dispatcher bindings.
#[derive(Default)]
pub struct LocalDispatchTable {
    bindings: HashMap<OwnerId, Weak<MessageDispatcher>>,
}

impl LocalDispatchTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an owner to a sub-dispatcher.
    ///
    /// Re-registering an owner replaces the previous binding (and logs a
    /// warning; two live dispatchers fighting over one owner id is almost
    /// always a cleanup bug upstream). Returns `true` if the binding was
    /// fresh.
    pub fn register(&mut self, owner: OwnerId, dispatcher: Weak<MessageDispatcher>) -> bool {
        let fresh = self.bindings.insert(owner, dispatcher).is_none();
        if fresh {
            trace!(owner = %owner, "local dispatcher registered");
        } else {
            warn!(owner = %owner, "local dispatcher re-registered; previous binding replaced");
        }
        fresh
    }

    /// Remove an owner's binding. Returns `true` if one existed.
    pub fn unregister(&mut self, owner: OwnerId) -> bool {
        let removed = self.bindings.remove(&owner).is_some();
        if removed {
            trace!(owner = %owner, "local dispatcher unregistered");
        }
        removed
    }

    /// Resolve an owner to its live sub-dispatcher.
    ///
    /// Returns `None` for unknown owners and for bindings whose dispatcher
    /// has been dropped.
    #[must_use]
    pub fn resolve(&self, owner: OwnerId) -> Option<Rc<MessageDispatcher>> {
        self.bindings.get(&owner).and_then(Weak::upgrade)
    }

    /// Drop bindings whose dispatcher is gone. Returns the number removed.
    pub fn prune(&mut self) -> usize {
        let before = self.bindings.len();
        self.bindings
            .retain(|_, dispatcher| dispatcher.strong_count() > 0);
        before - self.bindings.len()
    }

    /// Remove every binding.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Number of bindings, live or stale.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check whether no owner is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
