#![forbid(unsafe_code)]

//! Component nodes: the tree, per-element dependency tracking and dirty
//! replay.
//!
//! A [`ComponentNode`] owns the update functions of the elements it renders,
//! the bindings it created, and the set of its elements that are dirty. A
//! binding change reaches the node as a set of element ids (the elements
//! whose last render read the binding); the node merges them into its dirty
//! set and asks the [`scheduler`](crate::scheduler) for a pass. The pass
//! calls [`ComponentNode::update_dirty_elements`], which re-runs exactly the
//! dirty elements in ascending id order.
//!
//! # Lifecycle
//!
//! ```text
//! Constructing ──initial_render──▶ Idle ⇄ Rendering (replay)
//!                                   │  ▲
//!                       set_active(false) set_active(true)
//!                                   ▼  │
//!                                 inactive
//!                                   │
//!                               dispose()
//!                                   ▼
//!                       Disposing ──▶ Disposed
//! ```
//!
//! # Invariants
//!
//! 1. Element ids are allocated from the global counter after the parent's,
//!    so ascending replay order updates parents before children.
//! 2. Reads are recorded only while an element's function runs, and each
//!    re-run starts from an empty read set for that element.
//! 3. Deleted element ids are purged globally before every replay round.
//! 4. An id is removed from the dirty set before its function runs, so a
//!    function that dirties its own element is replayed again next round
//!    instead of being dropped.
//! 5. Replay is bounded by `max_replay_rounds`; ids still dirty after the
//!    last round stay dirty and another pass is requested.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Any call on a disposed node | `StateError::Disposed`, logged |
//! | Dispose with live children | `StateError::LiveChildren`, node unchanged |
//! | Dispose while a binding has foreign subscribers | `StateError::BindingDestroy`, node unchanged |
//! | Replay not converging | error logged, remaining ids stay dirty |

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use sprig_core::registry::{self, Subscriber};
use sprig_core::{Id, Value};

use crate::binding::{Binding, BindingInner, BindingKind, BindingRole, Origin};
use crate::config;
use crate::error::{Result, StateError};
use crate::render;
use crate::scheduler;

/// Lifecycle phase of a component node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Constructing,
    Rendering,
    Idle,
    Disposing,
    Disposed,
}

type UpdateFn = Rc<dyn Fn(Id, bool)>;

pub(crate) struct ElementEntry {
    update: UpdateFn,
    type_name: Rc<str>,
    peer: Option<Rc<dyn Any>>,
}

struct RecycledNode {
    node: ComponentNode,
    entry: Option<ElementEntry>,
    reads: Vec<Weak<BindingInner>>,
}

pub(crate) struct NodeInner {
    id: Cell<Id>,
    name: String,
    parent: RefCell<Weak<NodeInner>>,
    children: RefCell<BTreeMap<Id, Weak<NodeInner>>>,
    elements: RefCell<BTreeMap<Id, ElementEntry>>,
    element_reads: RefCell<AHashMap<Id, Vec<Weak<BindingInner>>>>,
    dirty: RefCell<BTreeSet<Id>>,
    phase: Cell<NodePhase>,
    rendering_depth: Cell<u32>,
    active: Cell<bool>,
    bindings: RefCell<Vec<Binding>>,
    provided: RefCell<BTreeMap<String, Binding>>,
    recycled: RefCell<AHashMap<String, Vec<RecycledNode>>>,
}

impl NodeInner {
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    fn label(&self) -> String {
        format!("{}{}", self.name, self.id.get())
    }
}

impl Subscriber for NodeInner {
    fn subscriber_id(&self) -> Id {
        self.id.get()
    }

    fn debug_label(&self) -> String {
        self.label()
    }
}

/// Bumps the rendering depth for the lifetime of the guard.
struct DepthGuard<'a>(&'a Cell<u32>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Shared handle to a component node.
#[derive(Clone)]
pub struct ComponentNode {
    inner: Rc<NodeInner>,
}

impl ComponentNode {
    /// Create a root node.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::with_id(name, registry::make_id(), None)
    }

    fn with_id(name: &str, id: Id, parent: Option<&ComponentNode>) -> Self {
        let inner = Rc::new(NodeInner {
            id: Cell::new(id),
            name: name.to_string(),
            parent: RefCell::new(parent.map(|p| Rc::downgrade(&p.inner)).unwrap_or_default()),
            children: RefCell::new(BTreeMap::new()),
            elements: RefCell::new(BTreeMap::new()),
            element_reads: RefCell::new(AHashMap::new()),
            dirty: RefCell::new(BTreeSet::new()),
            phase: Cell::new(NodePhase::Constructing),
            rendering_depth: Cell::new(0),
            active: Cell::new(parent.is_none_or(ComponentNode::is_active)),
            bindings: RefCell::new(Vec::new()),
            provided: RefCell::new(BTreeMap::new()),
            recycled: RefCell::new(AHashMap::new()),
        });
        let dynamic: Rc<dyn Subscriber> = inner.clone();
        registry::add(&dynamic);
        if let Some(parent) = parent {
            parent
                .inner
                .children
                .borrow_mut()
                .insert(id, Rc::downgrade(&inner));
        }
        tracing::trace!(message = "node.create", id = %id, name);
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<NodeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<NodeInner> {
        &self.inner
    }

    /// Create a child node with a fresh id.
    pub fn new_child(&self, name: &str) -> Result<ComponentNode> {
        self.ensure_alive("new_child")?;
        Ok(Self::with_id(name, registry::make_id(), Some(self)))
    }

    /// Create the child node hosted by element `element` of this node.
    ///
    /// The child's id is the element id.
    pub fn child_for_element(&self, element: Id, name: &str) -> Result<ComponentNode> {
        self.ensure_alive("child_for_element")?;
        if !self.has_element(element) || registry::has(element) {
            tracing::error!(message = "node.bad_host_element", node = %self.label(), element = %element);
            return Err(StateError::UnknownChild {
                node: self.label(),
                element,
            });
        }
        Ok(Self::with_id(name, element, Some(self)))
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.inner.id.get()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `Name#id`, used in diagnostics.
    #[must_use]
    pub fn label(&self) -> String {
        self.inner.label()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeInner> {
        Rc::downgrade(&self.inner)
    }

    #[must_use]
    pub fn phase(&self) -> NodePhase {
        match self.inner.phase.get() {
            NodePhase::Idle | NodePhase::Constructing if self.inner.rendering_depth.get() > 0 => {
                NodePhase::Rendering
            }
            phase => phase,
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.phase.get() == NodePhase::Disposed
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    #[must_use]
    pub fn parent(&self) -> Option<ComponentNode> {
        self.inner.parent.borrow().upgrade().map(Self::from_inner)
    }

    /// Number of live ancestors.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            depth += 1;
            cursor = node.parent();
        }
        depth
    }

    /// Live children in ascending id order.
    #[must_use]
    pub fn children(&self) -> Vec<ComponentNode> {
        self.inner
            .children
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .map(Self::from_inner)
            .filter(|c| !c.is_disposed())
            .collect()
    }

    fn ensure_alive(&self, operation: &'static str) -> Result<()> {
        if self.is_disposed() {
            tracing::error!(message = "node.disposed_call", node = %self.label(), operation);
            return Err(StateError::Disposed {
                node: self.label(),
                operation,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bindings
    // -----------------------------------------------------------------------

    /// Local state owned by this node.
    pub fn state(&self, name: &str, initial: impl Into<Value>) -> Result<Binding> {
        self.ensure_alive("state")?;
        Binding::create(
            name,
            BindingRole::State,
            BindingKind::Local,
            Origin::Local,
            initial.into(),
            Some(self),
        )
    }

    /// One-way projection of `source`.
    pub fn prop(&self, name: &str, source: &Binding) -> Result<Binding> {
        self.ensure_alive("prop")?;
        Binding::projection(name, BindingRole::Prop, source, source.origin(), Some(self))
    }

    /// Two-way link to `source`.
    pub fn link(&self, name: &str, source: &Binding) -> Result<Binding> {
        self.ensure_alive("link")?;
        Binding::create(
            name,
            BindingRole::Link,
            BindingKind::TwoWay {
                source: source.clone(),
            },
            source.origin(),
            Value::Undefined,
            Some(self),
        )
    }

    /// Nested-object link observing `object` directly.
    pub fn object_link(&self, name: &str, object: impl Into<Value>) -> Result<Binding> {
        self.ensure_alive("object_link")?;
        Binding::create(
            name,
            BindingRole::ObjectLink,
            BindingKind::NestedLink,
            Origin::Local,
            object.into(),
            Some(self),
        )
    }

    pub(crate) fn adopt_binding(&self, binding: &Binding) {
        self.inner.bindings.borrow_mut().push(binding.clone());
    }

    /// Bindings owned by this node, in registration order.
    #[must_use]
    pub fn bindings(&self) -> Vec<Binding> {
        self.inner.bindings.borrow().clone()
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Run the node's full render function once.
    pub fn initial_render(&self, render: impl FnOnce(&ComponentNode)) -> Result<()> {
        self.ensure_alive("initial_render")?;
        let phase = self.inner.phase.get();
        if phase != NodePhase::Constructing {
            tracing::error!(message = "node.initial_render_twice", node = %self.label(), ?phase);
            return Err(StateError::InvalidPhase {
                node: self.label(),
                operation: "initial_render",
                phase,
            });
        }
        {
            let _depth = DepthGuard::enter(&self.inner.rendering_depth);
            render(self);
        }
        self.inner.phase.set(NodePhase::Idle);
        tracing::debug!(
            message = "node.initial_render",
            node = %self.label(),
            elements = self.inner.elements.borrow().len(),
        );
        Ok(())
    }

    /// Allocate an element id, register `update` for it and run it once with
    /// `is_first = true`.
    pub fn observe_element(
        &self,
        type_name: &str,
        update: impl Fn(Id, bool) + 'static,
    ) -> Result<Id> {
        self.ensure_alive("observe_element")?;
        let element = Id::next();
        self.record_element_for_render(element, update, type_name)?;
        self.render_element(element, true);
        Ok(element)
    }

    /// Register the update function of `element`. It is not run.
    pub fn record_element_for_render(
        &self,
        element: Id,
        update: impl Fn(Id, bool) + 'static,
        type_name: &str,
    ) -> Result<()> {
        self.ensure_alive("record_element_for_render")?;
        let previous = self.inner.elements.borrow_mut().insert(
            element,
            ElementEntry {
                update: Rc::new(update),
                type_name: type_name.into(),
                peer: None,
            },
        );
        if previous.is_some() {
            tracing::warn!(message = "node.element_replaced", node = %self.label(), element = %element);
        }
        render::register_element(element, &self.inner);
        Ok(())
    }

    pub(crate) fn record_read(&self, element: Id, binding: &Binding) {
        let weak = binding.downgrade();
        let mut reads = self.inner.element_reads.borrow_mut();
        let list = reads.entry(element).or_default();
        if !list.iter().any(|w| w.ptr_eq(&weak)) {
            list.push(weak);
        }
    }

    fn clear_reads(&self, element: Id) {
        let reads = self.inner.element_reads.borrow_mut().remove(&element);
        for weak in reads.into_iter().flatten() {
            if let Some(inner) = weak.upgrade() {
                Binding::from_inner(inner).remove_dependent(element);
            }
        }
    }

    fn render_element(&self, element: Id, is_first: bool) -> bool {
        let update = self
            .inner
            .elements
            .borrow()
            .get(&element)
            .map(|e| Rc::clone(&e.update));
        let Some(update) = update else {
            tracing::warn!(message = "node.render_unknown", node = %self.label(), element = %element);
            return false;
        };
        self.clear_reads(element);
        let _depth = DepthGuard::enter(&self.inner.rendering_depth);
        let _frame = render::enter(&self.inner, element);
        tracing::trace!(message = "node.render_element", element = %element, is_first);
        update(element, is_first);
        true
    }

    /// Bindings read by the last render of `element`.
    #[must_use]
    pub fn element_reads(&self, element: Id) -> Vec<Binding> {
        self.inner
            .element_reads
            .borrow()
            .get(&element)
            .map(|list| {
                list.iter()
                    .filter_map(Weak::upgrade)
                    .map(Binding::from_inner)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Element ids registered on this node.
    #[must_use]
    pub fn element_ids(&self) -> Vec<Id> {
        self.inner.elements.borrow().keys().copied().collect()
    }

    #[must_use]
    pub fn has_element(&self, element: Id) -> bool {
        self.inner.elements.borrow().contains_key(&element)
    }

    #[must_use]
    pub fn element_type_name(&self, element: Id) -> Option<Rc<str>> {
        self.inner
            .elements
            .borrow()
            .get(&element)
            .map(|e| Rc::clone(&e.type_name))
    }

    /// Cache an opaque native peer for `element`.
    pub fn set_native_peer(&self, element: Id, peer: Rc<dyn Any>) -> bool {
        match self.inner.elements.borrow_mut().get_mut(&element) {
            Some(entry) => {
                entry.peer = Some(peer);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn native_peer(&self, element: Id) -> Option<Rc<dyn Any>> {
        self.inner
            .elements
            .borrow()
            .get(&element)
            .and_then(|e| e.peer.clone())
    }

    // -----------------------------------------------------------------------
    // Dirty tracking and replay
    // -----------------------------------------------------------------------

    /// A binding named `name` changed; `dependents` read it.
    pub(crate) fn property_has_changed(&self, name: &str, dependents: &[Id]) {
        if self.is_disposed() {
            tracing::error!(message = "node.change_after_dispose", node = %self.label(), binding = name);
            return;
        }
        tracing::debug!(
            message = "node.property_changed",
            node = %self.label(),
            binding = name,
            dependents = dependents.len(),
        );
        render::mark_elements_dirty(dependents);
    }

    pub(crate) fn mark_dirty(&self, elements: &[Id]) {
        if self.is_disposed() {
            return;
        }
        let became_dirty = {
            let known = self.inner.elements.borrow();
            let mut dirty = self.inner.dirty.borrow_mut();
            let was_empty = dirty.is_empty();
            dirty.extend(elements.iter().copied().filter(|id| known.contains_key(id)));
            was_empty && !dirty.is_empty()
        };
        if became_dirty {
            scheduler::request_pass(self);
        }
    }

    /// Dirty element ids in ascending order.
    #[must_use]
    pub fn dirty_elements(&self) -> Vec<Id> {
        self.inner.dirty.borrow().iter().copied().collect()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.inner.dirty.borrow().is_empty()
    }

    /// Re-run the update functions of all dirty elements.
    ///
    /// Returns how many update functions ran.
    pub fn update_dirty_elements(&self) -> Result<usize> {
        self.ensure_alive("update_dirty_elements")?;
        let _span = tracing::debug_span!("node.replay", node = %self.label()).entered();
        let max_rounds = config::current().max_replay_rounds;
        let mut ran = 0;
        let mut rounds = 0;
        loop {
            render::purge_deleted_elements();
            let batch = self.dirty_elements();
            if batch.is_empty() {
                break;
            }
            if rounds == max_rounds {
                tracing::error!(
                    message = "node.replay_unconverged",
                    node = %self.label(),
                    rounds,
                    remaining = batch.len(),
                );
                scheduler::request_pass(self);
                break;
            }
            rounds += 1;
            for element in batch {
                if self.is_disposed() {
                    return Ok(ran);
                }
                if !self.inner.dirty.borrow_mut().remove(&element) {
                    continue;
                }
                if self.render_element(element, false) {
                    ran += 1;
                }
            }
        }
        tracing::debug!(message = "node.replay", node = %self.label(), ran, rounds);
        Ok(ran)
    }

    /// Re-render one element, or every element, immediately.
    pub fn force_rerender(&self, element: Option<Id>) -> Result<usize> {
        self.ensure_alive("force_rerender")?;
        match element {
            Some(id) => {
                if self.has_element(id) {
                    self.inner.dirty.borrow_mut().insert(id);
                } else {
                    tracing::warn!(message = "node.rerender_unknown", node = %self.label(), element = %id);
                }
            }
            None => {
                let all = self.element_ids();
                self.inner.dirty.borrow_mut().extend(all);
            }
        }
        self.update_dirty_elements()
    }

    /// Forget `element`: its entry, its reads and its dirty mark.
    pub(crate) fn purge_element(&self, element: Id) -> bool {
        let existed = self.inner.elements.borrow_mut().remove(&element).is_some();
        self.clear_reads(element);
        self.inner.dirty.borrow_mut().remove(&element);
        render::unregister_element(element);
        if !existed {
            tracing::warn!(message = "node.purge_twice", node = %self.label(), element = %element);
        }
        existed
    }

    // -----------------------------------------------------------------------
    // Activation
    // -----------------------------------------------------------------------

    /// Activate or deactivate this node and its subtree.
    ///
    /// On activation, delayed binding changes are delivered in binding
    /// registration order and one scheduler pass is requested.
    pub fn set_active(&self, active: bool) -> Result<()> {
        self.ensure_alive("set_active")?;
        let was_active = self.inner.active.replace(active);
        if active && !was_active {
            let bindings = self.bindings();
            let flushed = bindings.iter().filter(|b| b.flush_delayed()).count();
            if self.is_dirty() {
                scheduler::request_pass(self);
            }
            tracing::debug!(message = "node.activate", node = %self.label(), flushed);
        } else if !active && was_active {
            tracing::debug!(message = "node.deactivate", node = %self.label());
        }
        for child in self.children() {
            child.set_active(active)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Disposal
    // -----------------------------------------------------------------------

    /// Tear the node down.
    ///
    /// Refused, with the node unchanged, while it has live children or while
    /// one of its bindings is subscribed to from outside the node.
    pub fn dispose(&self) -> Result<()> {
        self.ensure_alive("dispose")?;
        let live = self.children().len();
        if live > 0 {
            tracing::error!(message = "node.dispose_live_children", node = %self.label(), live);
            return Err(StateError::LiveChildren {
                node: self.label(),
                count: live,
            });
        }
        let bindings = self.bindings();
        let own: BTreeSet<Id> = bindings.iter().map(Binding::id).collect();
        for binding in &bindings {
            let foreign = binding
                .subscriber_ids()
                .into_iter()
                .filter(|id| !own.contains(id))
                .count();
            if foreign > 0 {
                tracing::error!(
                    message = "node.dispose_foreign_subscribers",
                    node = %self.label(),
                    binding = binding.name(),
                    foreign,
                );
                return Err(StateError::BindingDestroy {
                    name: binding.name().to_string(),
                    count: foreign,
                });
            }
        }

        self.inner.phase.set(NodePhase::Disposing);
        for element in self.element_ids() {
            self.purge_element(element);
        }
        // Later bindings may subscribe to earlier ones.
        for binding in bindings.iter().rev() {
            if let Err(err) = binding.destroy() {
                tracing::error!(message = "node.binding_destroy_failed", node = %self.label(), %err);
            }
        }
        self.inner.bindings.borrow_mut().clear();
        self.inner.provided.borrow_mut().clear();

        let pool: Vec<RecycledNode> = self
            .inner
            .recycled
            .borrow_mut()
            .drain()
            .flat_map(|(_, nodes)| nodes)
            .collect();
        for recycled in pool {
            if let Err(err) = recycled.node.dispose_subtree() {
                tracing::error!(message = "node.recycled_dispose_failed", node = %self.label(), %err);
            }
        }

        let id = self.id();
        if let Some(parent) = self.parent() {
            parent.inner.children.borrow_mut().remove(&id);
        }
        *self.inner.parent.borrow_mut() = Weak::new();
        registry::delete(id);
        scheduler::cancel(id);
        self.inner.active.set(false);
        self.inner.phase.set(NodePhase::Disposed);
        tracing::debug!(message = "node.disposed", node = %self.label());
        Ok(())
    }

    /// Dispose every descendant bottom-up, then this node.
    pub fn dispose_subtree(&self) -> Result<()> {
        for child in self.children() {
            child.dispose_subtree()?;
        }
        self.dispose()
    }

    // -----------------------------------------------------------------------
    // Provide / consume
    // -----------------------------------------------------------------------

    /// Make `binding` available to descendants under `alias`.
    pub fn provide(&self, alias: &str, binding: &Binding) -> Result<()> {
        self.ensure_alive("provide")?;
        let mut provided = self.inner.provided.borrow_mut();
        if provided.contains_key(alias) {
            tracing::error!(message = "node.duplicate_provider", node = %self.label(), alias);
            return Err(StateError::DuplicateProvider {
                alias: alias.to_string(),
            });
        }
        provided.insert(alias.to_string(), binding.clone());
        Ok(())
    }

    /// Link to the binding the nearest ancestor provides under `alias`.
    pub fn consume(&self, alias: &str, name: &str) -> Result<Binding> {
        self.ensure_alive("consume")?;
        let mut cursor = self.parent();
        while let Some(ancestor) = cursor {
            let found = ancestor.inner.provided.borrow().get(alias).cloned();
            if let Some(source) = found {
                return self.link(name, &source);
            }
            cursor = ancestor.parent();
        }
        Err(StateError::MissingProvider {
            alias: alias.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Recycling
    // -----------------------------------------------------------------------

    /// Deactivate `child` and park it in this node's pool under `key`.
    ///
    /// The child's host element entry and read bookkeeping travel with it.
    pub fn recycle_child(&self, child: &ComponentNode, key: &str) -> Result<()> {
        self.ensure_alive("recycle_child")?;
        let old = child.id();
        if !self.inner.children.borrow().contains_key(&old) {
            return Err(StateError::UnknownChild {
                node: self.label(),
                element: old,
            });
        }
        child.set_active(false)?;
        self.inner.children.borrow_mut().remove(&old);
        *child.inner.parent.borrow_mut() = Weak::new();

        let entry = self.inner.elements.borrow_mut().remove(&old);
        let reads = self
            .inner
            .element_reads
            .borrow_mut()
            .remove(&old)
            .unwrap_or_default();
        self.inner.dirty.borrow_mut().remove(&old);
        render::unregister_element(old);
        scheduler::cancel(old);

        tracing::debug!(message = "node.recycle", node = %self.label(), child = %child.label(), key);
        self.inner
            .recycled
            .borrow_mut()
            .entry(key.to_string())
            .or_default()
            .push(RecycledNode {
                node: child.clone(),
                entry,
                reads,
            });
        Ok(())
    }

    /// Number of parked nodes under `key`.
    #[must_use]
    pub fn recycled_count(&self, key: &str) -> usize {
        self.inner.recycled.borrow().get(key).map_or(0, Vec::len)
    }

    /// Take a parked node for element `new_id`, if one is available.
    ///
    /// The node's registration moves to `new_id`, its element entry and the
    /// bindings' dependent sets are re-pointed, and the element is marked
    /// dirty so its update function refreshes the reused node.
    ///
    /// Only the node id moves. The reused node's own element ids and its
    /// descendants' node ids are kept, so they may now be lower than
    /// `new_id`. Element order inside one node is unaffected, and the
    /// scheduler orders nodes by depth before id, so the reused node still
    /// replays before its descendants.
    pub fn reuse_child(&self, key: &str, new_id: Id) -> Result<Option<ComponentNode>> {
        self.ensure_alive("reuse_child")?;
        let popped = self
            .inner
            .recycled
            .borrow_mut()
            .get_mut(key)
            .and_then(Vec::pop);
        let Some(recycled) = popped else {
            return Ok(None);
        };
        let node = recycled.node.clone();
        let old = node.id();
        if !registry::remap_id(old, new_id) {
            self.inner
                .recycled
                .borrow_mut()
                .entry(key.to_string())
                .or_default()
                .push(recycled);
            return Err(StateError::RemapFailed { old, new: new_id });
        }

        node.inner.id.set(new_id);
        let label = node.label();
        for binding in node.bindings() {
            binding.set_owner_label(label.clone());
        }
        if let Some(entry) = recycled.entry {
            let mut elements = self.inner.elements.borrow_mut();
            elements.entry(new_id).or_insert(entry);
        }
        render::register_element(new_id, &self.inner);
        for weak in &recycled.reads {
            if let Some(inner) = weak.upgrade() {
                Binding::from_inner(inner).remap_dependent(old, new_id);
            }
        }
        self.inner
            .element_reads
            .borrow_mut()
            .insert(new_id, recycled.reads);

        self.inner
            .children
            .borrow_mut()
            .insert(new_id, Rc::downgrade(&node.inner));
        *node.inner.parent.borrow_mut() = Rc::downgrade(&self.inner);
        if self.is_active() {
            node.set_active(true)?;
        }
        self.mark_dirty(&[new_id]);
        tracing::debug!(message = "node.reuse", node = %self.label(), old = %old, new = %new_id, key);
        Ok(Some(node))
    }
}

impl fmt::Debug for ComponentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentNode")
            .field("id", &self.id())
            .field("name", &self.inner.name)
            .field("phase", &self.phase())
            .field("active", &self.is_active())
            .field("elements", &self.inner.elements.borrow().len())
            .field("dirty", &self.inner.dirty.borrow().len())
            .finish()
    }
}
