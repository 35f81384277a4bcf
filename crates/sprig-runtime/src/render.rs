#![forbid(unsafe_code)]

//! Render context and the element register.
//!
//! While an element's render (or update) function runs, its `(node, element)`
//! pair sits on top of a thread-scoped render stack. Binding reads consult
//! the top of that stack to attribute the read to the element being
//! produced. Outside a render the stack is empty and reads are not recorded.
//!
//! The element register maps every live element id to the component node
//! that owns it. It is how change notifications for arbitrary element ids
//! are routed to the right node, and how the deleted-element feed reaches
//! the nodes that must forget those ids.
//!
//! # Invariants
//!
//! 1. A read is recorded only while a frame is on the stack.
//! 2. Frames are popped by guard drop, so an early return or `?` inside a
//!    render function never leaves a stale frame behind.
//! 3. Deleted ids are purged from all bookkeeping before any replay.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use sprig_core::Id;

use crate::node::{ComponentNode, NodeInner};

thread_local! {
    static RENDER_STACK: RefCell<Vec<RenderFrame>> = const { RefCell::new(Vec::new()) };
    static ELEMENTS: RefCell<AHashMap<Id, Weak<NodeInner>>> = RefCell::new(AHashMap::new());
    static DELETED: RefCell<Vec<Id>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone)]
pub(crate) struct RenderFrame {
    pub(crate) node: Weak<NodeInner>,
    pub(crate) element: Id,
}

/// Pops its frame from the render stack on drop.
pub(crate) struct RenderGuard {
    element: Id,
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        let popped = RENDER_STACK.with(|stack| stack.borrow_mut().pop());
        debug_assert_eq!(popped.map(|f| f.element), Some(self.element));
    }
}

pub(crate) fn enter(node: &Rc<NodeInner>, element: Id) -> RenderGuard {
    RENDER_STACK.with(|stack| {
        stack.borrow_mut().push(RenderFrame {
            node: Rc::downgrade(node),
            element,
        });
    });
    RenderGuard { element }
}

pub(crate) fn current_frame() -> Option<RenderFrame> {
    RENDER_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Element whose render function is currently running, if any.
#[must_use]
pub fn current_rendering_element_id() -> Option<Id> {
    RENDER_STACK.with(|stack| stack.borrow().last().map(|f| f.element))
}

/// Whether any render or update function is running.
#[must_use]
pub fn is_render_in_progress() -> bool {
    RENDER_STACK.with(|stack| !stack.borrow().is_empty())
}

// ---------------------------------------------------------------------------
// Element register
// ---------------------------------------------------------------------------

pub(crate) fn register_element(element: Id, node: &Rc<NodeInner>) {
    ELEMENTS.with(|map| {
        map.borrow_mut().insert(element, Rc::downgrade(node));
    });
}

pub(crate) fn unregister_element(element: Id) -> bool {
    ELEMENTS.with(|map| map.borrow_mut().remove(&element).is_some())
}

pub(crate) fn remap_element(old: Id, new: Id) -> bool {
    ELEMENTS.with(|map| {
        let mut map = map.borrow_mut();
        if map.contains_key(&new) {
            return false;
        }
        match map.remove(&old) {
            Some(owner) => {
                map.insert(new, owner);
                true
            }
            None => false,
        }
    })
}

/// Component node that owns `element`, if it is still alive.
#[must_use]
pub fn owner_of(element: Id) -> Option<ComponentNode> {
    ELEMENTS
        .with(|map| map.borrow().get(&element).and_then(Weak::upgrade))
        .map(ComponentNode::from_inner)
}

/// Number of live registered elements.
#[must_use]
pub fn registered_element_count() -> usize {
    ELEMENTS.with(|map| map.borrow().len())
}

// ---------------------------------------------------------------------------
// Deleted-element feed
// ---------------------------------------------------------------------------

/// Report element ids that the UI layer has deleted.
///
/// The ids are queued and purged from every dependency set before the next
/// dirty replay.
pub fn report_deleted_elements(ids: impl IntoIterator<Item = Id>) {
    DELETED.with(|queue| queue.borrow_mut().extend(ids));
}

/// Number of deleted ids waiting to be purged.
#[must_use]
pub fn pending_deleted_count() -> usize {
    DELETED.with(|queue| queue.borrow().len())
}

/// Purge every queued deleted id from all bookkeeping.
///
/// Returns the number of ids that were actually known.
pub fn purge_deleted_elements() -> usize {
    let ids: Vec<Id> = DELETED.with(|queue| queue.borrow_mut().drain(..).collect());
    if ids.is_empty() {
        return 0;
    }
    let mut purged = 0;
    for id in ids {
        match owner_of(id) {
            Some(node) => {
                if node.purge_element(id) {
                    purged += 1;
                }
            }
            None => {
                unregister_element(id);
                tracing::warn!(message = "render.purge_unknown", element = %id);
            }
        }
    }
    tracing::debug!(message = "render.purged", count = purged);
    purged
}

/// Route element ids to the nodes that own them and mark them dirty there.
pub fn mark_elements_dirty(ids: &[Id]) {
    let mut by_node: Vec<(ComponentNode, Vec<Id>)> = Vec::new();
    for &id in ids {
        let Some(node) = owner_of(id) else {
            tracing::trace!(message = "render.mark_unowned", element = %id);
            continue;
        };
        match by_node.iter_mut().find(|(n, _)| n.ptr_eq(&node)) {
            Some((_, list)) => list.push(id),
            None => by_node.push((node, vec![id])),
        }
    }
    for (node, list) in by_node {
        node.mark_dirty(&list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ComponentNode;

    #[test]
    fn stack_is_empty_outside_render() {
        assert!(!is_render_in_progress());
        assert_eq!(current_rendering_element_id(), None);
    }

    #[test]
    fn guard_pops_frame() {
        let node = ComponentNode::new("Frame");
        let element = Id::next();
        {
            let _guard = enter(node.inner(), element);
            assert_eq!(current_rendering_element_id(), Some(element));
            assert!(is_render_in_progress());
        }
        assert!(!is_render_in_progress());
    }

    #[test]
    fn nested_frames_report_innermost() {
        let node = ComponentNode::new("Frame");
        let (outer, inner) = (Id::next(), Id::next());
        let _a = enter(node.inner(), outer);
        {
            let _b = enter(node.inner(), inner);
            assert_eq!(current_rendering_element_id(), Some(inner));
        }
        assert_eq!(current_rendering_element_id(), Some(outer));
    }

    #[test]
    fn unknown_deleted_ids_are_tolerated() {
        report_deleted_elements([Id::from_raw(u64::MAX - 1)]);
        assert_eq!(pending_deleted_count(), 1);
        assert_eq!(purge_deleted_elements(), 0);
        assert_eq!(pending_deleted_count(), 0);
    }

    #[test]
    fn remap_refuses_taken_target() {
        let node = ComponentNode::new("Remap");
        let (a, b) = (Id::next(), Id::next());
        register_element(a, node.inner());
        register_element(b, node.inner());
        assert!(!remap_element(a, b));
        unregister_element(a);
        unregister_element(b);
    }
}
