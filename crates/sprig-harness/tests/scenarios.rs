#![forbid(unsafe_code)]

//! End-to-end scenarios: bindings, component nodes, the scheduler and stores
//! working together.

use std::cell::Cell;
use std::rc::Rc;

use sprig_core::{Mutation, Object, Value};
use sprig_harness::{EventCapture, RecordingTree, tree_snapshot};
use sprig_runtime::config::{DelayPolicy, EngineConfig};
use sprig_runtime::store::environment::COLOR_MODE;
use sprig_runtime::{
    Binding, Environment, MemoryBackend, PersistentStore, StateError, StaticHost, Store,
    render, scheduler,
};
use tracing_subscriber::layer::SubscriberExt;

fn counter(binding: &Binding) -> Rc<Cell<u32>> {
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    binding.watch(move |_| c.set(c.get() + 1));
    count
}

// ============================================================================
// Basic update cycle
// ============================================================================

#[test]
fn counter_scenario() {
    let tree = RecordingTree::new("Counter");
    let node = tree.root();
    let count = node.state("count", 0).unwrap();
    let element = tree.element(node, "Text", &[count.clone()]).unwrap();

    count.set(1).unwrap();
    assert_eq!(node.dirty_elements(), vec![element]);

    count.set(1).unwrap();
    assert_eq!(node.dirty_elements(), vec![element], "same value is a no-op");

    assert_eq!(node.update_dirty_elements().unwrap(), 1);
    assert_eq!(tree.log().runs(element), 2);
    assert!(node.dirty_elements().is_empty());
    scheduler::cancel(node.id());
}

#[test]
fn run_pass_brings_every_node_up_to_date() {
    let tree = RecordingTree::new("App");
    let title = tree.root().state("title", "a").unwrap();
    let header = tree.element(tree.root(), "Header", &[title.clone()]).unwrap();
    let page = tree.child(tree.root(), "Page").unwrap();
    let body = tree.element(&page, "Body", &[title.clone()]).unwrap();

    title.set("b").unwrap();
    assert!(scheduler::has_pending_work());
    assert_eq!(scheduler::run_pass(), 2);
    assert!(!scheduler::has_pending_work());
    assert_eq!(tree.log().replay_order(), vec![header, body]);
    tree.teardown().unwrap();
}

// ============================================================================
// Idempotent set
// ============================================================================

#[test]
fn setting_the_current_value_notifies_nobody() {
    let tree = RecordingTree::new("Form");
    let name = tree.root().state("name", "ada").unwrap();
    let profile = tree
        .root()
        .state("profile", Object::record([("age", Value::from(36))]))
        .unwrap();
    let mirror = tree.root().link("name", &name).unwrap();
    tree.element(tree.root(), "Text", &[name.clone(), profile.clone()])
        .unwrap();
    let notified = counter(&name);
    let mirrored = counter(&mirror);

    name.set(name.get()).unwrap();
    profile.set(profile.get()).unwrap();
    mirror.set(mirror.get()).unwrap();

    assert_eq!((notified.get(), mirrored.get()), (0, 0));
    assert!(!tree.root().is_dirty());
}

// ============================================================================
// Dependency precision
// ============================================================================

#[test]
fn only_readers_of_a_binding_become_dirty() {
    let tree = RecordingTree::new("Panel");
    let a = tree.root().state("a", 0).unwrap();
    let b = tree.root().state("b", 0).unwrap();
    let reads_a = tree.element(tree.root(), "A", &[a.clone()]).unwrap();
    let reads_b = tree.element(tree.root(), "B", &[b.clone()]).unwrap();

    b.set(1).unwrap();
    assert_eq!(tree.root().dirty_elements(), vec![reads_b]);
    tree.root().update_dirty_elements().unwrap();

    a.set(1).unwrap();
    assert_eq!(tree.root().dirty_elements(), vec![reads_a]);
    scheduler::cancel(tree.root().id());
}

#[test]
fn in_place_mutation_dirties_readers() {
    let tree = RecordingTree::new("List");
    let items = tree.root().state("items", Object::array([])).unwrap();
    let element = tree.element(tree.root(), "Rows", &[items.clone()]).unwrap();

    items.apply(Mutation::Push(vec![Value::from("x")])).unwrap();
    assert_eq!(tree.root().dirty_elements(), vec![element]);
    tree.root().update_dirty_elements().unwrap();

    items.set_property("0", "y").unwrap();
    assert_eq!(tree.root().dirty_elements(), vec![element]);
    scheduler::cancel(tree.root().id());
}

#[test]
fn one_way_prop_isolates_the_child() {
    let tree = RecordingTree::new("Parent");
    let settings = tree
        .root()
        .state("settings", Object::record([("dense", Value::from(false))]))
        .unwrap();
    let child = tree.child(tree.root(), "Child").unwrap();
    let prop = child.prop("settings", &settings).unwrap();
    let element = tree.element(&child, "Toggle", &[prop.clone()]).unwrap();

    prop.set_property("dense", true).unwrap();
    assert_eq!(
        settings.get_unmonitored().as_object().unwrap().get("dense").as_bool(),
        Some(false),
        "a prop never writes back"
    );
    child.update_dirty_elements().unwrap();

    settings.set_property("dense", true).unwrap();
    assert!(!child.is_dirty(), "deep copy already matches");
    settings.set_property("dense", false).unwrap();
    assert_eq!(child.dirty_elements(), vec![element]);
    scheduler::run_pass();
    tree.teardown().unwrap();
}

// ============================================================================
// Ascending replay order
// ============================================================================

#[test]
fn replay_order_follows_element_ids() {
    let tree = RecordingTree::new("Root");
    let b2 = tree.root().state("b2", 0).unwrap();
    let b5 = tree.root().state("b5", 0).unwrap();
    let b9 = tree.root().state("b9", 0).unwrap();
    let e2 = tree.element(tree.root(), "E2", &[b2.clone()]).unwrap();
    let child = tree.child(tree.root(), "Child").unwrap();
    let e5 = tree.element(&child, "E5", &[b5.clone()]).unwrap();
    let e9 = tree.element(&child, "E9", &[b9.clone()]).unwrap();
    assert!(e2 < e5 && e5 < e9);

    b9.set(1).unwrap();
    b5.set(1).unwrap();
    b2.set(1).unwrap();
    scheduler::run_pass();

    assert_eq!(tree.log().replay_order(), vec![e2, e5, e9]);
    assert_eq!(tree.log().replay_labels(), vec!["E2", "E5", "E9"]);
    tree.teardown().unwrap();
}

// ============================================================================
// Cycle safety
// ============================================================================

#[test]
fn echoing_handler_does_not_recurse() {
    let source = Binding::local("source", 0).unwrap();
    let link = Binding::two_way("link", &source).unwrap();
    let source_notes = counter(&source);
    let link_notes = counter(&link);
    let echo = link.clone();
    source.watch(move |_| {
        let current = echo.get_unmonitored();
        echo.set(current).unwrap();
    });

    link.set(7).unwrap();
    assert_eq!(source.get().as_number(), Some(7.0));
    assert_eq!(link.get().as_number(), Some(7.0));
    assert_eq!((source_notes.get(), link_notes.get()), (1, 1));
}

#[test]
fn normalizing_handler_settles_on_the_last_write() {
    let source = Binding::local("source", 0).unwrap();
    let link = Binding::two_way("link", &source).unwrap();
    let link_notes = counter(&link);
    let clamp = link.clone();
    source.watch(move |_| {
        let v = clamp.get_unmonitored().as_number().unwrap_or(0.0);
        if v > 10.0 {
            clamp.set(10).unwrap();
        }
    });

    link.set(15).unwrap();
    assert_eq!(source.get().as_number(), Some(10.0));
    assert_eq!(link.get().as_number(), Some(10.0));
    assert_eq!(link_notes.get(), 1);
}

// ============================================================================
// Delayed delivery
// ============================================================================

#[test]
fn inactive_node_gets_one_batched_delivery() {
    let store = Store::new("app");
    store.set_or_create("p", 0).unwrap();
    let tree = RecordingTree::new("Screen");
    let link = store.link("p", Some(tree.root())).unwrap();
    let e1 = tree.element(tree.root(), "E1", &[link.clone()]).unwrap();
    let e2 = tree.element(tree.root(), "E2", &[link.clone()]).unwrap();
    let delivered = counter(&link);

    let capture = EventCapture::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    tracing::subscriber::with_default(subscriber, || {
        tree.root().set_active(false).unwrap();
        for v in 1..=3 {
            store.set("p", v).unwrap();
        }
        assert!(link.has_pending_change());
        assert!(!tree.root().is_dirty());
        assert_eq!(delivered.get(), 0);

        tree.root().set_active(true).unwrap();
    });

    assert_eq!(delivered.get(), 1);
    assert_eq!(capture.count("node.property_changed"), 1);
    assert_eq!(tree.root().dirty_elements(), vec![e1, e2]);
    scheduler::run_pass();
    assert_eq!(tree.log().replay_order(), vec![e1, e2]);
    assert_eq!(link.get_unmonitored().as_number(), Some(3.0));
    tree.teardown().unwrap();
}

#[test]
fn local_state_is_delayed_only_when_configured() {
    let tree = RecordingTree::new("Tab");
    let local = tree.root().state("local", 0).unwrap();
    let element = tree.element(tree.root(), "Text", &[local.clone()]).unwrap();
    tree.root().set_active(false).unwrap();

    local.set(1).unwrap();
    assert_eq!(tree.root().dirty_elements(), vec![element]);
    assert!(!local.has_pending_change());
    tree.root().update_dirty_elements().unwrap();

    let _config = EngineConfig {
        delay_policy: DelayPolicy::AllBindings,
        ..EngineConfig::default()
    }
    .push();
    local.set(2).unwrap();
    assert!(local.has_pending_change());
    assert!(!tree.root().is_dirty());
    tree.root().set_active(true).unwrap();
    assert_eq!(tree.root().dirty_elements(), vec![element]);
    scheduler::run_pass();
    tree.teardown().unwrap();
}

#[test]
fn inactive_nodes_are_skipped_by_the_pass() {
    let tree = RecordingTree::new("Root");
    let value = tree.root().state("value", 0).unwrap();
    let element = tree.element(tree.root(), "Text", &[value.clone()]).unwrap();
    tree.root().set_active(false).unwrap();
    value.set(1).unwrap();

    assert_eq!(scheduler::run_pass(), 0);
    assert_eq!(tree.root().dirty_elements(), vec![element]);

    tree.root().set_active(true).unwrap();
    assert_eq!(scheduler::run_pass(), 1);
    tree.teardown().unwrap();
}

// ============================================================================
// Deletion guard
// ============================================================================

#[test]
fn store_entry_with_a_subscriber_cannot_be_deleted() {
    let store = Store::new("app");
    let link = store.set_and_link("user", "ada", None).unwrap();

    assert_eq!(
        store.delete("user"),
        Err(StateError::HasSubscribers {
            key: "user".to_string(),
            count: 1
        })
    );
    assert_eq!(store.keys(), vec!["user"]);
    assert_eq!(store.get("user").unwrap().as_str(), Some("ada"));

    link.destroy().unwrap();
    assert_eq!(store.delete("user"), Ok(true));
    assert!(store.is_empty());
}

#[test]
fn disposing_a_node_releases_its_store_links() {
    let store = Store::new("app");
    store.set_or_create("theme", "light").unwrap();
    let tree = RecordingTree::new("Root");
    let page = tree.child(tree.root(), "Page").unwrap();
    store.link("theme", Some(&page)).unwrap();
    store.prop("theme", Some(&page)).unwrap();
    assert_eq!(store.subscriber_count("theme"), Some(2));

    tree.teardown().unwrap();
    assert_eq!(store.subscriber_count("theme"), Some(0));
    assert!(store.delete("theme").unwrap());
}

// ============================================================================
// Element deletion and recycling
// ============================================================================

#[test]
fn deleted_elements_never_replay() {
    let tree = RecordingTree::new("List");
    let rows = tree.root().state("rows", 2).unwrap();
    let keep = tree.element(tree.root(), "Keep", &[rows.clone()]).unwrap();
    let gone = tree.element(tree.root(), "Gone", &[rows.clone()]).unwrap();

    rows.set(1).unwrap();
    render::report_deleted_elements([gone]);
    scheduler::run_pass();

    assert_eq!(tree.log().replay_order(), vec![keep]);
    assert_eq!(rows.dependents(), vec![keep]);
    assert_eq!(render::pending_deleted_count(), 0);
    tree.teardown().unwrap();
}

#[test]
fn recycled_row_follows_its_new_host_element() {
    let tree = RecordingTree::new("List");
    let label = tree.root().state("label", "a").unwrap();
    let host = tree.element(tree.root(), "Row", &[label.clone()]).unwrap();
    let row = tree.root().child_for_element(host, "Row").unwrap();
    row.state("selected", false).unwrap();

    tree.root().recycle_child(&row, "Row").unwrap();
    let new_host = sprig_core::Id::next();
    let reused = tree.root().reuse_child("Row", new_host).unwrap().unwrap();
    assert!(reused.ptr_eq(&row));
    scheduler::run_pass();
    assert_eq!(tree.log().replay_order(), vec![new_host]);

    tree.log().clear();
    label.set("b").unwrap();
    scheduler::run_pass();
    assert_eq!(tree.log().replay_order(), vec![new_host]);
    assert_eq!(label.dependents(), vec![new_host]);
    tree.teardown().unwrap();
}

// ============================================================================
// Provide / consume
// ============================================================================

#[test]
fn consumed_binding_updates_the_provider_readers() {
    let tree = RecordingTree::new("App");
    let theme = tree.root().state("theme", "light").unwrap();
    tree.root().provide("theme", &theme).unwrap();
    let header = tree.element(tree.root(), "Header", &[theme.clone()]).unwrap();
    let leaf = tree.child(tree.root(), "Leaf").unwrap();
    let consumed = leaf.consume("theme", "theme").unwrap();
    let swatch = tree.element(&leaf, "Swatch", &[consumed.clone()]).unwrap();

    consumed.set("dark").unwrap();
    scheduler::run_pass();
    assert_eq!(tree.log().replay_order(), vec![header, swatch]);

    let snapshot = tree_snapshot(tree.root());
    assert_eq!(snapshot["children"][0]["bindings"][0]["name"], "theme");
    tree.teardown().unwrap();
}

// ============================================================================
// Persistence and environment
// ============================================================================

#[test]
fn persisted_key_round_trips_through_a_component() {
    let store = Store::new("app");
    let backend = Rc::new(MemoryBackend::new());
    let persist = PersistentStore::new(store.clone(), backend.clone());
    persist.persist_prop("volume", 5).unwrap();

    let tree = RecordingTree::new("Settings");
    let volume = store.link("volume", Some(tree.root())).unwrap();
    let slider = tree.element(tree.root(), "Slider", &[volume.clone()]).unwrap();

    volume.set(8).unwrap();
    assert_eq!(
        sprig_runtime::KeyValueBackend::get(&*backend, "volume")
            .unwrap()
            .and_then(|v| v.as_number()),
        Some(8.0)
    );

    backend.external_set("volume", Value::from(2));
    assert_eq!(volume.get_unmonitored().as_number(), Some(2.0));
    scheduler::run_pass();
    assert_eq!(tree.log().runs(slider), 2, "both changes land in one replay");
    tree.teardown().unwrap();
}

#[test]
fn host_signal_reaches_a_reactivated_screen_once() {
    let store = Store::new("app");
    let host = Rc::new(StaticHost::new().with(COLOR_MODE, "light"));
    let env = Environment::new(store.clone(), host.clone());
    env.env_prop(COLOR_MODE, "light").unwrap();

    let tree = RecordingTree::new("Screen");
    let mode = store.prop(COLOR_MODE, Some(tree.root())).unwrap();
    let element = tree.element(tree.root(), "Background", &[mode.clone()]).unwrap();
    tree.root().set_active(false).unwrap();

    host.update(COLOR_MODE, "dark");
    host.update(COLOR_MODE, "light");
    host.update(COLOR_MODE, "dark");
    assert!(mode.has_pending_change());

    tree.root().set_active(true).unwrap();
    scheduler::run_pass();
    assert_eq!(tree.log().replay_order(), vec![element]);
    assert_eq!(mode.get_unmonitored().as_str(), Some("dark"));
    tree.teardown().unwrap();
}

#[cfg(feature = "state-persistence")]
#[test]
fn file_backed_value_survives_a_restart() {
    use sprig_runtime::FileBackend;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let store = Store::new("first-run");
        let persist =
            PersistentStore::new(store.clone(), Rc::new(FileBackend::open(&path).unwrap()));
        persist
            .persist_prop("recent", Object::array([Value::from("a.txt")]))
            .unwrap();
        store
            .entry("recent")
            .unwrap()
            .apply(Mutation::Push(vec![Value::from("b.txt")]))
            .unwrap();
    }

    let store = Store::new("second-run");
    let persist = PersistentStore::new(store.clone(), Rc::new(FileBackend::open(&path).unwrap()));
    persist.persist_prop("recent", Object::array([])).unwrap();
    let recent = store.get("recent").unwrap();
    assert_eq!(recent.as_object().unwrap().get("length").as_number(), Some(2.0));
}
