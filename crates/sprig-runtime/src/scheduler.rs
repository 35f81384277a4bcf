#![forbid(unsafe_code)]

//! Pass scheduler.
//!
//! Nodes whose dirty set goes from empty to non-empty ask for a pass. The
//! host calls [`run_pass`] once per frame (or whenever it likes); the pass
//! replays every requesting node by tree depth, then by ascending node id,
//! which puts parents before their children even after a recycled node has
//! taken a fresh id. Requests made while the pass runs are served by the
//! same pass, in a later round.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Weak;

use sprig_core::Id;

use crate::config;
use crate::node::{ComponentNode, NodeInner};

thread_local! {
    static PENDING: RefCell<BTreeMap<Id, Weak<NodeInner>>> = const { RefCell::new(BTreeMap::new()) };
}

/// Ask for `node` to be replayed in the next pass. Idempotent.
pub fn request_pass(node: &ComponentNode) {
    let inserted = PENDING.with(|pending| {
        pending
            .borrow_mut()
            .insert(node.id(), node.downgrade())
            .is_none()
    });
    if inserted {
        tracing::trace!(message = "scheduler.request", node = %node.label());
    }
}

/// Withdraw a request.
pub fn cancel(node: Id) -> bool {
    PENDING.with(|pending| pending.borrow_mut().remove(&node).is_some())
}

/// Ids of nodes waiting for a pass, ascending.
#[must_use]
pub fn pending_nodes() -> Vec<Id> {
    PENDING.with(|pending| pending.borrow().keys().copied().collect())
}

/// Whether any node waits for a pass.
#[must_use]
pub fn has_pending_work() -> bool {
    PENDING.with(|pending| !pending.borrow().is_empty())
}

/// Replay every node that asked for a pass.
///
/// Inactive nodes are skipped; they ask again when reactivated. Returns the
/// number of update functions that ran.
pub fn run_pass() -> usize {
    let _span = tracing::debug_span!("scheduler.pass").entered();
    let max_rounds = config::current().max_replay_rounds;
    let mut ran = 0;
    let mut rounds = 0;
    loop {
        let batch: Vec<(Id, Weak<NodeInner>)> =
            PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()).into_iter().collect());
        if batch.is_empty() {
            break;
        }
        if rounds == max_rounds {
            tracing::error!(message = "scheduler.unconverged", rounds, remaining = batch.len());
            PENDING.with(|pending| pending.borrow_mut().extend(batch));
            break;
        }
        rounds += 1;
        let mut nodes: Vec<(usize, Id, ComponentNode)> = batch
            .into_iter()
            .filter_map(|(id, weak)| {
                let node = ComponentNode::from_inner(weak.upgrade()?);
                Some((node.depth(), id, node))
            })
            .collect();
        nodes.sort_by_key(|(depth, id, _)| (*depth, *id));
        for (_, id, node) in nodes {
            if node.is_disposed() || !node.is_active() {
                tracing::trace!(message = "scheduler.skip", node = %id);
                continue;
            }
            match node.update_dirty_elements() {
                Ok(count) => ran += count,
                Err(err) => tracing::warn!(message = "scheduler.replay_failed", node = %id, %err),
            }
        }
    }
    tracing::debug!(message = "scheduler.pass", ran, rounds);
    ran
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn pass_replays_nodes_in_ascending_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let parent = ComponentNode::new("Parent");
        let value = parent.state("v", 0).unwrap();

        let (v, o) = (value.clone(), Rc::clone(&order));
        let host = parent
            .observe_element("Host", move |id, first| {
                let _ = v.get();
                if !first {
                    o.borrow_mut().push(id);
                }
            })
            .unwrap();
        let child = parent.child_for_element(host, "Child").unwrap();
        let (v, o) = (value.clone(), Rc::clone(&order));
        let leaf = child
            .observe_element("Leaf", move |id, first| {
                let _ = v.get();
                if !first {
                    o.borrow_mut().push(id);
                }
            })
            .unwrap();

        value.set(1).unwrap();
        assert_eq!(pending_nodes(), vec![parent.id(), child.id()]);
        assert_eq!(run_pass(), 2);
        assert_eq!(*order.borrow(), vec![host, leaf]);
        assert!(!has_pending_work());
    }

    #[test]
    fn reused_node_replays_before_its_older_descendants() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let list = ComponentNode::new("List");
        let value = list.state("v", 0).unwrap();
        let host = list.observe_element("Row", |_, _| {}).unwrap();
        let row = list.child_for_element(host, "Row").unwrap();

        let (v, o) = (value.clone(), Rc::clone(&order));
        let cell = row
            .observe_element("Cell", move |_, first| {
                let _ = v.get();
                if !first {
                    o.borrow_mut().push("row");
                }
            })
            .unwrap();
        let leaf = row.child_for_element(cell, "Leaf").unwrap();
        let (v, o) = (value.clone(), Rc::clone(&order));
        leaf.observe_element("Text", move |_, first| {
            let _ = v.get();
            if !first {
                o.borrow_mut().push("leaf");
            }
        })
        .unwrap();

        list.recycle_child(&row, "Row").unwrap();
        let reused = list.reuse_child("Row", Id::next()).unwrap().unwrap();
        assert!(leaf.id() < reused.id());
        run_pass();
        order.borrow_mut().clear();

        value.set(1).unwrap();
        run_pass();
        assert_eq!(*order.borrow(), vec!["row", "leaf"]);
    }

    #[test]
    fn inactive_nodes_are_skipped() {
        let node = ComponentNode::new("Sleeper");
        let value = node.state("v", 0).unwrap();
        let v = value.clone();
        node.observe_element("Text", move |_, _| {
            let _ = v.get();
        })
        .unwrap();
        node.set_active(false).unwrap();
        value.set(1).unwrap();
        assert_eq!(run_pass(), 0);
        assert!(node.is_dirty());

        node.set_active(true).unwrap();
        assert_eq!(run_pass(), 1);
        assert!(!node.is_dirty());
    }

    #[test]
    fn request_is_idempotent() {
        let node = ComponentNode::new("Twice");
        request_pass(&node);
        request_pass(&node);
        assert_eq!(pending_nodes().iter().filter(|id| **id == node.id()).count(), 1);
        assert!(cancel(node.id()));
        assert!(!cancel(node.id()));
    }
}
