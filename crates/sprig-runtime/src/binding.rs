#![forbid(unsafe_code)]

//! Property bindings: named, observable slots holding a [`Value`].
//!
//! One [`Binding`] type covers every variant; the variant is a tag, not a
//! subtype.
//!
//! | Kind | Holds | Reads | Writes |
//! |------|-------|-------|--------|
//! | [`BindingKind::Local`] | its own value | own value | own value |
//! | [`BindingKind::OneWay`] | a copy of the source | own copy | own copy only |
//! | [`BindingKind::TwoWay`] | nothing | source | source |
//! | [`BindingKind::NestedLink`] | an observed object | own value | own value |
//!
//! Compound values held by a binding are wrapped (see
//! [`ObservedObject`](sprig_core::ObservedObject)) with the binding as an
//! owner, so in-place mutation of the object notifies the binding.
//!
//! # Notification
//!
//! A change first goes to the owning component node (the element ids that
//! read the binding are marked dirty there) and the binding's watch
//! callbacks, then to every subscriber binding, depth first. When `set`
//! returns, every transitively reachable binding has been notified.
//!
//! A binding whose owner is inactive and for which delaying is enabled (see
//! [`DelayPolicy`](crate::config::DelayPolicy)) does not notify its owner;
//! it records a pending change instead, delivered once on reactivation.
//! Propagation to subscriber bindings is never delayed.
//!
//! # Invariants
//!
//! 1. Writing a value that is the same (per `same_value`) as the current one
//!    notifies nobody.
//! 2. A two-way binding writing through to its source notifies its own
//!    dependents exactly once, however the source's notification fans out.
//! 3. A one-way binding never writes to its source.
//! 4. A binding with subscribers cannot be destroyed.
//!
//! # Failure Modes
//!
//! - Shape violation: `set` and the constructors return
//!   [`StateError::ShapeViolation`] and the value is unchanged.
//! - Write after destroy: [`StateError::BindingDestroyed`].

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use sprig_core::registry::{self, Subscriber};
use sprig_core::{
    Id, Mutation, ObjectChange, Shape, Value, deep_copy, deep_eq, shallow_copy, wrap_value,
};

use crate::config::{self, CopyPolicy, DelayPolicy};
use crate::error::{Result, StateError};
use crate::node::{ComponentNode, NodeInner};
use crate::render;

/// Role of a binding, used in diagnostics and to pick its allowed shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRole {
    /// Local component state.
    State,
    /// One-way projection of a parent or store value.
    Prop,
    /// Two-way link to a parent or store value.
    Link,
    /// Link to a compound value owned elsewhere.
    ObjectLink,
    /// Entry of a store.
    StoreEntry,
}

impl BindingRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Prop => "prop",
            Self::Link => "link",
            Self::ObjectLink => "object link",
            Self::StoreEntry => "store entry",
        }
    }

    #[must_use]
    pub const fn shape(self) -> Shape {
        match self {
            Self::ObjectLink => Shape::Object,
            _ => Shape::State,
        }
    }
}

/// Where a binding's data ultimately lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Component-local data.
    Local,
    /// A store entry.
    Store,
}

/// Synchronization topology of a binding.
#[derive(Clone)]
pub enum BindingKind {
    Local,
    OneWay { source: Binding, policy: CopyPolicy },
    TwoWay { source: Binding },
    NestedLink,
}

impl BindingKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::OneWay { .. } => "one-way",
            Self::TwoWay { .. } => "two-way",
            Self::NestedLink => "nested-link",
        }
    }

    fn source(&self) -> Option<&Binding> {
        match self {
            Self::OneWay { source, .. } | Self::TwoWay { source } => Some(source),
            Self::Local | Self::NestedLink => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayState {
    Idle,
    Pending,
}

type Watcher = Rc<dyn Fn(&str)>;

pub(crate) struct BindingInner {
    id: Id,
    name: String,
    role: BindingRole,
    origin: Origin,
    kind: BindingKind,
    value: RefCell<Value>,
    subscribers: RefCell<BTreeSet<Id>>,
    /// Element ids whose last render read this binding.
    dependents: RefCell<BTreeSet<Id>>,
    owner: RefCell<Weak<NodeInner>>,
    /// Label of the owning component, kept for diagnostics after it is gone.
    owner_label: RefCell<String>,
    delay: Cell<DelayState>,
    watchers: RefCell<Vec<Watcher>>,
    /// Reentrancy guard for two-way write-through.
    changing: Cell<bool>,
    /// Bumped on every delivered change.
    version: Cell<u64>,
    /// Source version this two-way binding last reported.
    seen_source: Cell<u64>,
    destroyed: Cell<bool>,
}

/// Shared handle to a property binding.
#[derive(Clone)]
pub struct Binding {
    inner: Rc<BindingInner>,
}

impl Binding {
    pub(crate) fn create(
        name: &str,
        role: BindingRole,
        kind: BindingKind,
        origin: Origin,
        initial: Value,
        owner: Option<&ComponentNode>,
    ) -> Result<Self> {
        let owner_label = owner.map_or_else(|| "<detached>".to_string(), ComponentNode::label);
        let id = registry::make_id();

        let checked = match &kind {
            BindingKind::TwoWay { source } => source.get_unmonitored(),
            _ => initial.clone(),
        };
        check_shape(&owner_label, role, name, &checked)?;

        let stored = match &kind {
            BindingKind::TwoWay { .. } => Value::Undefined,
            _ => wrap_value(&initial, Some(id)),
        };

        let inner = Rc::new(BindingInner {
            id,
            name: name.to_string(),
            role,
            origin,
            kind,
            value: RefCell::new(stored),
            subscribers: RefCell::new(BTreeSet::new()),
            dependents: RefCell::new(BTreeSet::new()),
            owner: RefCell::new(owner.map(|n| Rc::downgrade(n.inner())).unwrap_or_default()),
            owner_label: RefCell::new(owner_label),
            delay: Cell::new(DelayState::Idle),
            watchers: RefCell::new(Vec::new()),
            changing: Cell::new(false),
            version: Cell::new(0),
            seen_source: Cell::new(0),
            destroyed: Cell::new(false),
        });
        let dynamic: Rc<dyn Subscriber> = inner.clone();
        registry::add(&dynamic);
        if let Some(source) = inner.kind.source() {
            source.add_subscriber(id);
        }

        let binding = Self { inner };
        if let Some(node) = owner {
            node.adopt_binding(&binding);
        }
        tracing::trace!(
            message = "binding.create",
            id = %id,
            name,
            kind = binding.inner.kind.label(),
            role = role.as_str(),
        );
        Ok(binding)
    }

    /// Standalone local binding, not owned by any component.
    pub fn local(name: &str, initial: impl Into<Value>) -> Result<Self> {
        Self::create(
            name,
            BindingRole::State,
            BindingKind::Local,
            Origin::Local,
            initial.into(),
            None,
        )
    }

    /// Standalone one-way projection of `source`, using the configured copy
    /// policy.
    pub fn one_way(name: &str, source: &Binding) -> Result<Self> {
        Self::projection(name, BindingRole::Prop, source, Origin::Local, None)
    }

    /// Standalone two-way link to `source`.
    pub fn two_way(name: &str, source: &Binding) -> Result<Self> {
        Self::create(
            name,
            BindingRole::Link,
            BindingKind::TwoWay {
                source: source.clone(),
            },
            Origin::Local,
            Value::Undefined,
            None,
        )
    }

    /// Standalone nested-object link observing `object` directly.
    pub fn nested(name: &str, object: impl Into<Value>) -> Result<Self> {
        Self::create(
            name,
            BindingRole::ObjectLink,
            BindingKind::NestedLink,
            Origin::Local,
            object.into(),
            None,
        )
    }

    pub(crate) fn projection(
        name: &str,
        role: BindingRole,
        source: &Binding,
        origin: Origin,
        owner: Option<&ComponentNode>,
    ) -> Result<Self> {
        let policy = config::current().copy_policy;
        let snapshot = snapshot(&source.get_unmonitored(), policy);
        Self::create(
            name,
            role,
            BindingKind::OneWay {
                source: source.clone(),
                policy,
            },
            origin,
            snapshot,
            owner,
        )
    }

    pub(crate) fn from_inner(inner: Rc<BindingInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<BindingInner> {
        Rc::downgrade(&self.inner)
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn role(&self) -> BindingRole {
        self.inner.role
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.inner.origin
    }

    #[must_use]
    pub fn kind(&self) -> &BindingKind {
        &self.inner.kind
    }

    /// Upstream binding of a one-way or two-way binding.
    #[must_use]
    pub fn source(&self) -> Option<Binding> {
        self.inner.kind.source().cloned()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current value, recording the read against the rendering element.
    pub fn get(&self) -> Value {
        if let Some(frame) = render::current_frame() {
            self.inner.dependents.borrow_mut().insert(frame.element);
            if let Some(node) = frame.node.upgrade() {
                ComponentNode::from_inner(node).record_read(frame.element, self);
            }
        }
        self.get_unmonitored()
    }

    /// Current value without recording a read.
    #[must_use]
    pub fn get_unmonitored(&self) -> Value {
        match &self.inner.kind {
            BindingKind::TwoWay { source } => source.get_unmonitored(),
            _ => self.inner.value.borrow().clone(),
        }
    }

    /// Write a new value.
    ///
    /// A value equal to the current one is a no-op. One-way bindings accept
    /// local writes, which last until the source next changes.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if self.inner.destroyed.get() {
            tracing::error!(message = "binding.set_destroyed", name = %self.inner.name);
            return Err(StateError::BindingDestroyed {
                name: self.inner.name.clone(),
            });
        }
        check_shape(
            &self.inner.owner_label.borrow(),
            self.inner.role,
            &self.inner.name,
            &value,
        )?;
        if render::is_render_in_progress() {
            tracing::error!(
                message = "binding.set_during_render",
                name = %self.inner.name,
                owner = %self.inner.owner_label.borrow(),
            );
        }

        if let BindingKind::TwoWay { source } = &self.inner.kind {
            if source.get_unmonitored().same_value(&value) {
                return Ok(());
            }
            if self.inner.changing.get() {
                return source.set(value);
            }
            self.inner.changing.set(true);
            let written = source.set(value);
            self.inner.changing.set(false);
            written?;
            // Outer deliveries of older source versions are now stale.
            self.inner.seen_source.set(source.inner.version.get());
            tracing::debug!(message = "binding.set", id = %self.inner.id, name = %self.inner.name);
            self.inner.notify_changed();
            return Ok(());
        }

        if self.inner.value.borrow().same_value(&value) {
            return Ok(());
        }
        self.inner.replace_value(&value);
        tracing::debug!(message = "binding.set", id = %self.inner.id, name = %self.inner.name);
        self.inner.notify_changed();
        Ok(())
    }

    /// Apply an in-place mutating call to the held compound value.
    pub fn apply(&self, mutation: Mutation) -> Result<Value> {
        Ok(self.observed_target()?.apply(mutation)?)
    }

    /// Observed write of one property of the held compound value.
    pub fn set_property(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        Ok(self.observed_target()?.set(key, value)?)
    }

    fn observed_target(&self) -> Result<sprig_core::ObservedObject> {
        let value = self.get_unmonitored();
        value.as_observed().cloned().ok_or_else(|| StateError::ShapeViolation {
            component: self.inner.owner_label.borrow().clone(),
            role: self.inner.role.as_str(),
            name: self.inner.name.clone(),
            expected: Shape::Object.describe(),
            value: value.type_name().to_string(),
        })
    }

    /// Register `subscriber` for change propagation.
    pub fn add_subscriber(&self, subscriber: Id) -> bool {
        self.inner.subscribers.borrow_mut().insert(subscriber)
    }

    /// Unregister `subscriber`.
    pub fn remove_subscriber(&self, subscriber: Id) -> bool {
        self.inner.subscribers.borrow_mut().remove(&subscriber)
    }

    #[must_use]
    pub fn subscriber_ids(&self) -> Vec<Id> {
        self.inner.subscribers.borrow().iter().copied().collect()
    }

    #[must_use]
    pub fn number_of_subscribers(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Run `callback` with the binding name after every delivered change.
    pub fn watch(&self, callback: impl Fn(&str) + 'static) {
        self.inner.watchers.borrow_mut().push(Rc::new(callback));
    }

    /// Whether a change is waiting for the owner to reactivate.
    #[must_use]
    pub fn has_pending_change(&self) -> bool {
        self.inner.delay.get() == DelayState::Pending
    }

    /// Element ids whose last render read this binding.
    #[must_use]
    pub fn dependents(&self) -> Vec<Id> {
        self.inner.dependents.borrow().iter().copied().collect()
    }

    pub(crate) fn remove_dependent(&self, element: Id) -> bool {
        self.inner.dependents.borrow_mut().remove(&element)
    }

    pub(crate) fn remap_dependent(&self, old: Id, new: Id) {
        let mut deps = self.inner.dependents.borrow_mut();
        if deps.remove(&old) {
            deps.insert(new);
        }
    }

    pub(crate) fn set_owner_label(&self, label: String) {
        *self.inner.owner_label.borrow_mut() = label;
    }

    /// Deliver a delayed change to the owner. Returns whether one was pending.
    pub(crate) fn flush_delayed(&self) -> bool {
        if self.inner.delay.get() != DelayState::Pending {
            return false;
        }
        self.inner.delay.set(DelayState::Idle);
        tracing::debug!(message = "binding.flush_delayed", name = %self.inner.name);
        let owner = self.inner.owner.borrow().upgrade();
        self.inner.notify_owner(owner);
        true
    }

    /// Tear down the binding.
    ///
    /// Refused while other bindings still subscribe to it. Otherwise the
    /// binding leaves its source's subscriber set and its value's owner set,
    /// then the registry.
    pub fn destroy(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.destroyed.get() {
            tracing::warn!(message = "binding.destroy_twice", name = %inner.name);
            return Ok(());
        }
        let count = inner.subscribers.borrow().len();
        if count > 0 {
            tracing::error!(
                message = "binding.destroy_refused",
                name = %inner.name,
                subscribers = count,
            );
            return Err(StateError::BindingDestroy {
                name: inner.name.clone(),
                count,
            });
        }
        if let Some(source) = inner.kind.source() {
            source.remove_subscriber(inner.id);
        }
        if let Some(observed) = inner.value.borrow().as_observed() {
            observed.remove_owner(inner.id);
        }
        registry::delete(inner.id);
        inner.destroyed.set(true);
        inner.dependents.borrow_mut().clear();
        inner.watchers.borrow_mut().clear();
        inner.delay.set(DelayState::Idle);
        tracing::trace!(message = "binding.destroy", id = %inner.id, name = %inner.name);
        Ok(())
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind.label())
            .field("value", &self.get_unmonitored())
            .finish()
    }
}

impl BindingInner {
    fn delay_enabled(&self) -> bool {
        self.origin == Origin::Store || config::current().delay_policy == DelayPolicy::AllBindings
    }

    fn replace_value(&self, value: &Value) {
        let wrapped = wrap_value(value, Some(self.id));
        let old = self.value.replace(wrapped);
        if let Some(observed) = old.as_observed()
            && !old.same_value(value)
        {
            observed.remove_owner(self.id);
        }
    }

    fn notify_changed(&self) {
        if self.destroyed.get() {
            return;
        }
        self.version.set(self.version.get().wrapping_add(1));
        let owner = self.owner.borrow().upgrade();
        match &owner {
            Some(node) if self.delay_enabled() && !node.is_active() => {
                self.delay.set(DelayState::Pending);
                tracing::trace!(message = "binding.delayed", name = %self.name);
            }
            _ => self.notify_owner(owner),
        }
        self.propagate();
    }

    fn notify_owner(&self, owner: Option<Rc<NodeInner>>) {
        let deps: Vec<Id> = self.dependents.borrow().iter().copied().collect();
        match owner {
            Some(node) => ComponentNode::from_inner(node).property_has_changed(&self.name, &deps),
            None => render::mark_elements_dirty(&deps),
        }
        let watchers: Vec<Watcher> = self.watchers.borrow().clone();
        for watcher in watchers {
            watcher(&self.name);
        }
    }

    fn propagate(&self) {
        let subscribers: Vec<Id> = self.subscribers.borrow().iter().copied().collect();
        for id in subscribers {
            match registry::get(id) {
                Some(subscriber) => subscriber.on_source_changed(self.id),
                None => tracing::trace!(message = "binding.subscriber_gone", subscriber = %id),
            }
        }
    }
}

impl Subscriber for BindingInner {
    fn subscriber_id(&self) -> Id {
        self.id
    }

    fn debug_label(&self) -> String {
        format!("{} `{}` of {}", self.role.as_str(), self.name, self.owner_label.borrow())
    }

    fn on_source_changed(&self, source: Id) {
        if self.destroyed.get() {
            return;
        }
        match &self.kind {
            BindingKind::OneWay {
                source: upstream,
                policy,
            } => {
                let fresh = snapshot(&upstream.get_unmonitored(), *policy);
                let changed = match policy {
                    CopyPolicy::Deep => !deep_eq(&fresh, &self.value.borrow()),
                    // Shallow copies share nested objects with the source, so
                    // an in-place change there cannot be seen by comparison.
                    CopyPolicy::Shallow => {
                        !(fresh.is_primitive() && fresh.same_value(&self.value.borrow()))
                    }
                };
                if changed {
                    self.replace_value(&fresh);
                    tracing::debug!(message = "binding.resync", name = %self.name, source = %source);
                    self.notify_changed();
                }
            }
            BindingKind::TwoWay { source: upstream } => {
                let version = upstream.inner.version.get();
                if self.changing.get() || self.seen_source.get() == version {
                    return;
                }
                self.seen_source.set(version);
                self.notify_changed();
            }
            BindingKind::Local | BindingKind::NestedLink => {
                tracing::warn!(message = "binding.unexpected_source", name = %self.name, source = %source);
            }
        }
    }

    fn on_object_changed(&self, change: &ObjectChange<'_>) {
        if self.destroyed.get() {
            return;
        }
        let holds_it = self
            .value
            .borrow()
            .as_observed()
            .is_some_and(|held| held.ptr_eq(change.object));
        if !holds_it {
            // Stale ownership: the value was replaced before this change.
            change.object.remove_owner(self.id);
            return;
        }
        tracing::debug!(
            message = "binding.object_changed",
            name = %self.name,
            property = change.property,
        );
        self.notify_changed();
    }
}

fn snapshot(value: &Value, policy: CopyPolicy) -> Value {
    match policy {
        CopyPolicy::Shallow => shallow_copy(value),
        CopyPolicy::Deep => deep_copy(value),
    }
}

fn check_shape(component: &str, role: BindingRole, name: &str, value: &Value) -> Result<()> {
    let shape = role.shape();
    if shape.accepts(value) {
        return Ok(());
    }
    Err(StateError::ShapeViolation {
        component: component.to_string(),
        role: role.as_str(),
        name: name.to_string(),
        expected: shape.describe(),
        value: value.type_name().to_string(),
    })
}

/// Read `binding` on behalf of a widget property accessor.
pub fn read(binding: &Binding) -> Value {
    binding.get()
}

/// Write `value` to `binding` on behalf of a widget property setter.
pub fn write(binding: &Binding, value: impl Into<Value>) -> Result<()> {
    binding.set(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprig_core::{Callback, MutationError, Object};
    use std::cell::Cell;

    fn counter(b: &Binding) -> Rc<Cell<u32>> {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        b.watch(move |_| h.set(h.get() + 1));
        hits
    }

    #[test]
    fn local_set_and_noop() {
        let b = Binding::local("count", 0).unwrap();
        let hits = counter(&b);
        b.set(1).unwrap();
        b.set(1).unwrap();
        assert_eq!(b.get().as_number(), Some(1.0));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn function_is_rejected() {
        let b = Binding::local("handler", 0).unwrap();
        let err = b
            .set(Value::Function(Callback::new(|_| Value::Null)))
            .unwrap_err();
        assert!(matches!(err, StateError::ShapeViolation { role: "state", .. }));
        assert_eq!(b.get().as_number(), Some(0.0));
    }

    #[test]
    fn nested_link_requires_object() {
        assert!(Binding::nested("obj", 3).is_err());
        assert!(Binding::nested("obj", Object::array([])).is_ok());
    }

    #[test]
    fn one_way_follows_source_but_never_writes_back() {
        let src = Binding::local("src", "a").unwrap();
        let prop = Binding::one_way("prop", &src).unwrap();
        assert_eq!(src.number_of_subscribers(), 1);

        src.set("b").unwrap();
        assert_eq!(prop.get().as_str(), Some("b"));

        prop.set("local").unwrap();
        assert_eq!(src.get().as_str(), Some("b"));

        src.set("c").unwrap();
        assert_eq!(prop.get().as_str(), Some("c"));
    }

    #[test]
    fn one_way_deep_copy_isolates_nested_data() {
        let src = Binding::local("src", Object::record([("n", Value::from(1))])).unwrap();
        let prop = Binding::one_way("prop", &src).unwrap();
        prop.set_property("n", 2).unwrap();
        assert_eq!(
            src.get_unmonitored().as_observed().unwrap().get("n").as_number(),
            Some(1.0)
        );
    }

    #[test]
    fn one_way_sees_in_place_source_mutation() {
        let src = Binding::local("src", Object::array([Value::from(1)])).unwrap();
        let prop = Binding::one_way("prop", &src).unwrap();
        let hits = counter(&prop);
        src.apply(Mutation::Push(vec![Value::from(2)])).unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(
            prop.get_unmonitored().as_observed().unwrap().get("length").as_number(),
            Some(2.0)
        );
    }

    #[test]
    fn two_way_writes_through_once() {
        let src = Binding::local("src", 0).unwrap();
        let link = Binding::two_way("link", &src).unwrap();
        let src_hits = counter(&src);
        let link_hits = counter(&link);

        link.set(5).unwrap();
        assert_eq!(src.get().as_number(), Some(5.0));
        assert_eq!(src_hits.get(), 1);
        assert_eq!(link_hits.get(), 1);

        src.set(6).unwrap();
        assert_eq!(link.get().as_number(), Some(6.0));
        assert_eq!(link_hits.get(), 2);
    }

    #[test]
    fn echoing_watcher_does_not_loop() {
        let src = Binding::local("src", 0).unwrap();
        let link = Binding::two_way("link", &src).unwrap();
        let echo = link.clone();
        src.watch(move |_| {
            let v = echo.get_unmonitored();
            echo.set(v).unwrap();
        });
        let src_hits = counter(&src);
        let link_hits = counter(&link);

        src.set(3).unwrap();
        assert_eq!(link.get().as_number(), Some(3.0));
        assert_eq!(src_hits.get(), 1);
        assert_eq!(link_hits.get(), 1);
    }

    #[test]
    fn local_object_mutation_notifies() {
        let b = Binding::local("list", Object::array([])).unwrap();
        let hits = counter(&b);
        let out = b.apply(Mutation::Push(vec![Value::from(1)])).unwrap();
        assert_eq!(out.as_number(), Some(1.0));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn replaced_object_no_longer_notifies() {
        let first = Object::array([]);
        let b = Binding::local("list", first.clone()).unwrap();
        let hits = counter(&b);
        b.set(Object::array([])).unwrap();
        assert_eq!(hits.get(), 1);

        let stale = sprig_core::ObservedObject::wrap(&first, None);
        assert!(!stale.has_owner(b.id()));
        stale.apply(Mutation::Push(vec![Value::Null])).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn nested_link_observes_deep_property() {
        let inner = Object::record([("label", Value::from("x"))]);
        let parent = Binding::local(
            "parent",
            Object::record([("inner", Value::from(inner.clone()))]),
        )
        .unwrap();
        let link = Binding::nested("inner", inner).unwrap();
        let parent_hits = counter(&parent);
        let link_hits = counter(&link);

        link.set_property("label", "y").unwrap();
        assert_eq!(link_hits.get(), 1);
        assert_eq!(parent_hits.get(), 0, "parent binding itself did not change");
        let seen = parent.get_unmonitored().as_observed().unwrap().get("inner");
        assert_eq!(seen.as_object().unwrap().get("label").as_str(), Some("y"));
    }

    #[test]
    fn clamping_watcher_on_source_notifies_link_once() {
        let src = Binding::local("src", 0).unwrap();
        let link = Binding::two_way("link", &src).unwrap();
        let clamp = link.clone();
        src.watch(move |_| {
            if clamp.get_unmonitored().as_number().unwrap_or(0.0) > 10.0 {
                clamp.set(10).unwrap();
            }
        });
        let link_hits = counter(&link);

        src.set(15).unwrap();
        assert_eq!(link.get().as_number(), Some(10.0));
        assert_eq!(link_hits.get(), 1);
    }

    #[test]
    fn later_source_write_in_same_watcher_reaches_link() {
        let src = Binding::local("src", 0).unwrap();
        let link = Binding::two_way("link", &src).unwrap();
        let (via_link, direct) = (link.clone(), src.clone());
        let fired = Rc::new(Cell::new(false));
        let once = Rc::clone(&fired);
        src.watch(move |_| {
            if !once.replace(true) {
                via_link.set(10).unwrap();
                direct.set(5).unwrap();
            }
        });
        let link_hits = counter(&link);

        src.set(15).unwrap();
        assert!(fired.get());
        assert_eq!(link.get().as_number(), Some(5.0));
        assert_eq!(link_hits.get(), 2);
    }

    #[test]
    fn parent_side_write_reaches_nested_link() {
        let row = Object::record([("label", Value::from("a"))]);
        let parent = Binding::local("rows", Object::array([Value::from(row.clone())])).unwrap();
        let link = Binding::nested("row", row).unwrap();
        let link_hits = counter(&link);

        let first = parent.get_unmonitored().as_observed().unwrap().get("0");
        first.as_observed().expect("row is observed").set("label", "b").unwrap();

        assert_eq!(link_hits.get(), 1);
        let label = link.get_unmonitored().as_observed().unwrap().get("label");
        assert_eq!(label.as_str(), Some("b"));
    }

    #[test]
    fn oversized_array_writes_are_refused() {
        let b = Binding::local("list", Object::array([Value::from(1)])).unwrap();
        let hits = counter(&b);

        assert!(matches!(
            b.set_property("length", 1.0e18),
            Err(StateError::Mutation(MutationError::OutOfRange { .. }))
        ));
        assert!(matches!(
            b.set_property("99999999999999", 2),
            Err(StateError::Mutation(MutationError::OutOfRange { .. }))
        ));
        assert_eq!(hits.get(), 0);
        let list = b.get_unmonitored().as_observed().unwrap().get("length");
        assert_eq!(list.as_number(), Some(1.0));
    }

    #[test]
    fn destroy_refused_with_subscribers() {
        let src = Binding::local("src", 1).unwrap();
        let link = Binding::two_way("link", &src).unwrap();
        assert!(matches!(
            src.destroy(),
            Err(StateError::BindingDestroy { count: 1, .. })
        ));
        link.destroy().unwrap();
        assert_eq!(src.number_of_subscribers(), 0);
        src.destroy().unwrap();
        assert!(!registry::has(src.id()));
        assert!(matches!(src.set(2), Err(StateError::BindingDestroyed { .. })));
    }

    #[test]
    fn read_and_write_funnel_through_binding() {
        let b = Binding::local("title", "a").unwrap();
        write(&b, "b").unwrap();
        assert_eq!(read(&b).as_str(), Some("b"));
    }
}
