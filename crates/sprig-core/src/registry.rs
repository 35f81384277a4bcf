#![forbid(unsafe_code)]

//! Subscriber Registry: resolves ids to live subscribers.
//!
//! Bindings and component nodes never hold strong references to the things
//! that observe them. They keep ids, and resolve those ids here at
//! notification time. The registry holds only `Weak` handles, so
//! registration never extends a subscriber's lifetime, and a lookup for a
//! subscriber that has since been dropped simply yields `None`.
//!
//! # Invariants
//!
//! 1. An id maps to at most one subscriber at a time.
//! 2. [`SubscriberRegistry::add`] refuses an id that is already registered.
//! 3. [`SubscriberRegistry::remap_id`] moves a registration atomically: after
//!    it returns `true` the old id is free and the new id resolves to the same
//!    subscriber. It never leaves the subscriber registered under both.
//! 4. There is no garbage collection. Owners delete their ids explicitly.
//!
//! # Failure Modes
//!
//! Duplicate adds, deletes of unknown ids and impossible remaps return
//! `false` and log a warning. They never panic.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::id::Id;
use crate::observed::ObjectChange;

/// Anything with a registry identity that can receive change notifications.
///
/// Both hooks default to no-ops so that subscribers implement only the
/// notifications they take part in.
pub trait Subscriber {
    /// The id this subscriber was registered under.
    fn subscriber_id(&self) -> Id;

    /// Human-readable label for diagnostics.
    fn debug_label(&self) -> String {
        format!("subscriber {}", self.subscriber_id())
    }

    /// A sync source this subscriber follows has changed.
    fn on_source_changed(&self, _source: Id) {}

    /// An observed object this subscriber owns was mutated in place.
    fn on_object_changed(&self, _change: &ObjectChange<'_>) {}
}

/// Id to subscriber map.
///
/// Most code uses the thread-scoped instance through the free functions of
/// this module; standalone instances exist for tests and embedding.
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: AHashMap<Id, Weak<dyn Subscriber>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` under its own id.
    ///
    /// Returns `false` if that id is already taken.
    pub fn add(&mut self, subscriber: &Rc<dyn Subscriber>) -> bool {
        let id = subscriber.subscriber_id();
        if self.entries.contains_key(&id) {
            tracing::warn!(message = "registry.add_duplicate", id = %id);
            return false;
        }
        self.entries.insert(id, Rc::downgrade(subscriber));
        true
    }

    /// Resolve `id` to a live subscriber.
    #[must_use]
    pub fn get(&self, id: Id) -> Option<Rc<dyn Subscriber>> {
        self.entries.get(&id).and_then(Weak::upgrade)
    }

    /// Whether `id` is registered (the subscriber may already be dropped).
    #[must_use]
    pub fn has(&self, id: Id) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove the registration for `id`.
    ///
    /// Returns `false` if `id` is unknown.
    pub fn delete(&mut self, id: Id) -> bool {
        if self.entries.remove(&id).is_none() {
            tracing::warn!(message = "registry.delete_unknown", id = %id);
            return false;
        }
        true
    }

    /// Move the registration of `old` to `new`.
    ///
    /// Fails when `old` is unknown or `new` is already taken; the registry is
    /// unchanged in that case.
    pub fn remap_id(&mut self, old: Id, new: Id) -> bool {
        if old == new {
            return self.entries.contains_key(&old);
        }
        if self.entries.contains_key(&new) {
            tracing::warn!(message = "registry.remap_target_taken", old = %old, new = %new);
            return false;
        }
        let Some(entry) = self.entries.remove(&old) else {
            tracing::warn!(message = "registry.remap_unknown", old = %old, new = %new);
            return false;
        };
        self.entries.insert(new, entry);
        true
    }

    /// Number of registrations, including ones whose subscriber is gone.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

thread_local! {
    static REGISTRY: RefCell<SubscriberRegistry> = RefCell::new(SubscriberRegistry::new());
}

/// Issue a fresh globally unique id.
#[must_use]
pub fn make_id() -> Id {
    Id::next()
}

/// Register `subscriber` in the thread-scoped registry.
pub fn add(subscriber: &Rc<dyn Subscriber>) -> bool {
    REGISTRY.with(|r| r.borrow_mut().add(subscriber))
}

/// Resolve `id` in the thread-scoped registry.
///
/// The registry borrow is released before this returns, so the caller may
/// notify the subscriber, which may in turn use the registry again.
#[must_use]
pub fn get(id: Id) -> Option<Rc<dyn Subscriber>> {
    REGISTRY.with(|r| r.borrow().get(id))
}

/// Whether `id` is registered in the thread-scoped registry.
#[must_use]
pub fn has(id: Id) -> bool {
    REGISTRY.with(|r| r.borrow().has(id))
}

/// Remove `id` from the thread-scoped registry.
pub fn delete(id: Id) -> bool {
    REGISTRY.with(|r| r.borrow_mut().delete(id))
}

/// Move a registration in the thread-scoped registry. Used only when a
/// recycled component node takes over a new element id.
pub fn remap_id(old: Id, new: Id) -> bool {
    REGISTRY.with(|r| r.borrow_mut().remap_id(old, new))
}

/// Number of registrations in the thread-scoped registry.
#[must_use]
pub fn len() -> usize {
    REGISTRY.with(|r| r.borrow().len())
}
