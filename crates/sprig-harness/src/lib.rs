#![forbid(unsafe_code)]

//! Test harness for Sprig.
//!
//! - [`RecordingTree`] builds component trees whose elements log every run
//!   of their update function, so tests can assert how often and in which
//!   order elements were replayed.
//! - [`EventCapture`] is a `tracing` layer that records event message names,
//!   for asserting that propagation logged what it should.
//! - [`strategies`] holds `proptest` strategies for values.
//! - [`tree_snapshot`] renders a node subtree as JSON for structural
//!   assertions.

pub mod strategies;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;
use sprig_core::Id;
use sprig_runtime::{Binding, ComponentNode, Result};
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

// ---------------------------------------------------------------------------
// Render log
// ---------------------------------------------------------------------------

/// One run of an element update function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderEvent {
    pub element: Id,
    pub label: String,
    pub first: bool,
}

/// Shared, append-only log of element runs.
#[derive(Debug, Clone, Default)]
pub struct RenderLog {
    events: Rc<RefCell<Vec<RenderEvent>>>,
}

impl RenderLog {
    fn push(&self, event: RenderEvent) {
        self.events.borrow_mut().push(event);
    }

    /// Every run, first renders included.
    #[must_use]
    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.borrow().clone()
    }

    /// Total runs of `element`, first render included.
    #[must_use]
    pub fn runs(&self, element: Id) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.element == element)
            .count()
    }

    /// Element ids of replays (not first renders) in the order they ran.
    #[must_use]
    pub fn replay_order(&self) -> Vec<Id> {
        self.events
            .borrow()
            .iter()
            .filter(|e| !e.first)
            .map(|e| e.element)
            .collect()
    }

    /// Labels of replays in the order they ran.
    #[must_use]
    pub fn replay_labels(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter(|e| !e.first)
            .map(|e| e.label.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

// ---------------------------------------------------------------------------
// Recording tree
// ---------------------------------------------------------------------------

/// Builder for component trees with logged elements.
///
/// Build in traversal order (a parent's elements before its children's) so
/// element ids ascend from the root down, as a real host would allocate them.
#[derive(Debug)]
pub struct RecordingTree {
    root: ComponentNode,
    log: RenderLog,
}

impl RecordingTree {
    #[must_use]
    pub fn new(root_name: &str) -> Self {
        Self {
            root: ComponentNode::new(root_name),
            log: RenderLog::default(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &ComponentNode {
        &self.root
    }

    #[must_use]
    pub fn log(&self) -> &RenderLog {
        &self.log
    }

    /// Add an element to `node` whose update function reads `reads`.
    pub fn element(&self, node: &ComponentNode, label: &str, reads: &[Binding]) -> Result<Id> {
        let reads: Vec<Binding> = reads.to_vec();
        let log = self.log.clone();
        let type_name = label;
        let label = label.to_string();
        node.observe_element(type_name, move |element, first| {
            for binding in &reads {
                let _ = binding.get();
            }
            log.push(RenderEvent {
                element,
                label: label.clone(),
                first,
            });
        })
    }

    /// Add a host element to `parent` and the child component it hosts.
    pub fn child(&self, parent: &ComponentNode, name: &str) -> Result<ComponentNode> {
        let host = self.element(parent, name, &[])?;
        parent.child_for_element(host, name)
    }

    /// Dispose the whole tree bottom-up.
    pub fn teardown(&self) -> Result<()> {
        self.root.dispose_subtree()
    }
}

/// JSON description of `node` and its live descendants.
#[must_use]
pub fn tree_snapshot(node: &ComponentNode) -> serde_json::Value {
    let bindings: Vec<serde_json::Value> = node
        .bindings()
        .iter()
        .map(|b| json!({ "name": b.name(), "value": b.get_unmonitored().to_string() }))
        .collect();
    let children: Vec<serde_json::Value> = node.children().iter().map(tree_snapshot).collect();
    json!({
        "name": node.name(),
        "active": node.is_active(),
        "elements": node.element_ids().len(),
        "dirty": node.dirty_elements().len(),
        "bindings": bindings,
        "children": children,
    })
}

// ---------------------------------------------------------------------------
// Event capture
// ---------------------------------------------------------------------------

/// `tracing` layer recording the `message` field of every event.
#[derive(Debug, Clone, Default)]
pub struct EventCapture {
    messages: Arc<Mutex<Vec<String>>>,
}

impl EventCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded messages in emission order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many events carried `message`.
    #[must_use]
    pub fn count(&self, message: &str) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.as_str() == message)
            .count()
    }
}

struct MessageVisitor(Option<String>);

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" && self.0.is_none() {
            self.0 = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if let Some(message) = visitor.0 {
            self.messages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn elements_log_first_render() {
        let tree = RecordingTree::new("Root");
        let count = tree.root().state("count", 0).unwrap();
        let element = tree.element(tree.root(), "Text", &[count]).unwrap();
        assert_eq!(tree.log().runs(element), 1);
        assert!(tree.log().replay_order().is_empty());
        tree.teardown().unwrap();
    }

    #[test]
    fn child_is_hosted_by_parent_element() {
        let tree = RecordingTree::new("Root");
        let child = tree.child(tree.root(), "Row").unwrap();
        assert!(tree.root().has_element(child.id()));
        assert_eq!(tree_snapshot(tree.root())["children"][0]["name"], "Row");
        tree.teardown().unwrap();
        assert!(child.is_disposed());
    }

    #[test]
    fn capture_records_messages() {
        let capture = EventCapture::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(message = "probe.one", n = 1);
            tracing::info!("probe.two");
        });
        assert_eq!(capture.messages(), vec!["probe.one", "probe.two"]);
    }
}
