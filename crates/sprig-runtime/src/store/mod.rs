#![forbid(unsafe_code)]

//! Store containers: named collections of bindings.
//!
//! A [`Store`] maps keys to store-entry bindings. Components never hold an
//! entry directly; they link to it ([`Store::link`], two-way) or project it
//! ([`Store::prop`], one-way). Bindings created against an entry are marked
//! as store-backed, which is what makes them eligible for delayed delivery
//! while their component is inactive.
//!
//! [`AppStore::global`] is the thread-scoped application store, created on
//! first use. Local stores are plain [`Store::new`] instances scoped to
//! whatever owns them.
//!
//! # Failure Modes
//!
//! | Operation | Condition | Result |
//! |-----------|-----------|--------|
//! | `set` | unknown key | `UnknownKey` |
//! | `set`, `set_or_create` | null or undefined value | `NullValue` |
//! | `link`, `prop` | unknown key | `MissingEntry` |
//! | `delete` | entry still subscribed | `HasSubscribers`, store unchanged |
//! | `clear` | any entry still subscribed | `StoreBusy`, store unchanged |

pub mod backend;
pub mod environment;
#[cfg(feature = "state-persistence")]
pub mod json;
pub mod persist;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use sprig_core::Value;

use crate::binding::{Binding, BindingKind, BindingRole, Origin};
use crate::error::{Result, StateError};
use crate::node::ComponentNode;

pub use backend::{ChangeListener, KeyValueBackend, MemoryBackend};
pub use environment::{Environment, HostSignals, StaticHost};
pub use persist::PersistentStore;

thread_local! {
    static APP_STORE: Store = Store::new("AppStore");
}

struct StoreInner {
    label: String,
    entries: RefCell<BTreeMap<String, Binding>>,
}

/// Shared handle to a named collection of store-entry bindings.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

/// The application-wide store.
pub struct AppStore;

impl AppStore {
    /// The thread-scoped application store, created on first use.
    #[must_use]
    pub fn global() -> Store {
        APP_STORE.with(Clone::clone)
    }
}

impl Store {
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                label: label.to_string(),
                entries: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.inner.entries.borrow().contains_key(key)
    }

    /// Current value of `key`, without recording a read.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entry(key).map(|b| b.get_unmonitored())
    }

    /// The entry binding for `key`.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<Binding> {
        self.inner.entries.borrow().get(key).cloned()
    }

    /// Write an existing entry.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.refuse_nullish(key, &value)?;
        let Some(entry) = self.entry(key) else {
            tracing::error!(message = "store.set_unknown", store = %self.inner.label, key);
            return Err(StateError::UnknownKey {
                key: key.to_string(),
            });
        };
        entry.set(value)
    }

    /// Write an entry, creating it if missing.
    pub fn set_or_create(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.refuse_nullish(key, &value)?;
        if let Some(entry) = self.entry(key) {
            return entry.set(value);
        }
        let entry = Binding::create(
            key,
            BindingRole::StoreEntry,
            BindingKind::Local,
            Origin::Store,
            value,
            None,
        )?;
        self.inner
            .entries
            .borrow_mut()
            .insert(key.to_string(), entry);
        tracing::debug!(message = "store.create", store = %self.inner.label, key);
        Ok(())
    }

    fn refuse_nullish(&self, key: &str, value: &Value) -> Result<()> {
        if value.is_nullish() {
            tracing::error!(message = "store.null_value", store = %self.inner.label, key);
            return Err(StateError::NullValue {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn require(&self, key: &str) -> Result<Binding> {
        self.entry(key).ok_or_else(|| StateError::MissingEntry {
            key: key.to_string(),
        })
    }

    /// Two-way link to entry `key`, owned by `owner` if given.
    pub fn link(&self, key: &str, owner: Option<&ComponentNode>) -> Result<Binding> {
        let entry = self.require(key)?;
        match owner {
            Some(node) => node.link(key, &entry),
            None => Binding::create(
                key,
                BindingRole::Link,
                BindingKind::TwoWay { source: entry },
                Origin::Store,
                Value::Undefined,
                None,
            ),
        }
    }

    /// One-way projection of entry `key`, owned by `owner` if given.
    pub fn prop(&self, key: &str, owner: Option<&ComponentNode>) -> Result<Binding> {
        let entry = self.require(key)?;
        match owner {
            Some(node) => node.prop(key, &entry),
            None => Binding::projection(key, BindingRole::Prop, &entry, Origin::Store, None),
        }
    }

    /// [`link`](Self::link), creating the entry with `default` if missing.
    pub fn set_and_link(
        &self,
        key: &str,
        default: impl Into<Value>,
        owner: Option<&ComponentNode>,
    ) -> Result<Binding> {
        if !self.has(key) {
            self.set_or_create(key, default)?;
        }
        self.link(key, owner)
    }

    /// [`prop`](Self::prop), creating the entry with `default` if missing.
    pub fn set_and_prop(
        &self,
        key: &str,
        default: impl Into<Value>,
        owner: Option<&ComponentNode>,
    ) -> Result<Binding> {
        if !self.has(key) {
            self.set_or_create(key, default)?;
        }
        self.prop(key, owner)
    }

    /// Remove entry `key`. Returns `Ok(false)` if there was none.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let Some(entry) = self.entry(key) else {
            return Ok(false);
        };
        let count = entry.number_of_subscribers();
        if count > 0 {
            tracing::error!(
                message = "store.delete_refused",
                store = %self.inner.label,
                key,
                subscribers = count,
            );
            return Err(StateError::HasSubscribers {
                key: key.to_string(),
                count,
            });
        }
        entry.destroy()?;
        self.inner.entries.borrow_mut().remove(key);
        tracing::debug!(message = "store.delete", store = %self.inner.label, key);
        Ok(true)
    }

    /// Remove every entry, or none if any entry is still subscribed.
    pub fn clear(&self) -> Result<()> {
        let busy: Vec<String> = self
            .inner
            .entries
            .borrow()
            .iter()
            .filter(|(_, b)| b.number_of_subscribers() > 0)
            .map(|(k, _)| k.clone())
            .collect();
        if !busy.is_empty() {
            tracing::error!(message = "store.clear_refused", store = %self.inner.label, busy = ?busy);
            return Err(StateError::StoreBusy { keys: busy });
        }
        let entries = std::mem::take(&mut *self.inner.entries.borrow_mut());
        for entry in entries.values() {
            entry.destroy()?;
        }
        tracing::debug!(message = "store.clear", store = %self.inner.label, removed = entries.len());
        Ok(())
    }

    /// Keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    /// Subscriber count of entry `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &str) -> Option<usize> {
        self.entry(key).map(|b| b.number_of_subscribers())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("label", &self.inner.label)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    #[test]
    fn set_requires_existing_key() {
        let store = Store::new("test");
        assert!(matches!(store.set("a", 1), Err(StateError::UnknownKey { .. })));
        store.set_or_create("a", 1).unwrap();
        store.set("a", 2).unwrap();
        assert_eq!(store.get("a").and_then(|v| v.as_number()), Some(2.0));
    }

    #[test]
    fn nullish_values_are_refused() {
        let store = Store::new("test");
        assert!(matches!(
            store.set_or_create("a", Value::Null),
            Err(StateError::NullValue { .. })
        ));
        store.set_or_create("a", 1).unwrap();
        assert!(matches!(
            store.set("a", Value::Undefined),
            Err(StateError::NullValue { .. })
        ));
        assert!(!store.has("b"));
    }

    #[test]
    fn link_and_prop_need_an_entry() {
        let store = Store::new("test");
        assert!(matches!(store.link("x", None), Err(StateError::MissingEntry { .. })));
        assert!(matches!(store.prop("x", None), Err(StateError::MissingEntry { .. })));

        let link = store.set_and_link("x", 1, None).unwrap();
        let prop = store.set_and_prop("x", 99, None).unwrap();
        assert_eq!(prop.get().as_number(), Some(1.0), "existing entry wins over default");
        assert_eq!(link.origin(), Origin::Store);

        link.set(5).unwrap();
        assert_eq!(store.get("x").and_then(|v| v.as_number()), Some(5.0));
        assert_eq!(prop.get().as_number(), Some(5.0));
        prop.set(7).unwrap();
        assert_eq!(store.get("x").and_then(|v| v.as_number()), Some(5.0));
    }

    #[test]
    #[traced_test]
    fn delete_is_guarded_by_subscribers() {
        let store = Store::new("test");
        let link = store.set_and_link("k", "v", None).unwrap();
        assert!(matches!(
            store.delete("k"),
            Err(StateError::HasSubscribers { count: 1, .. })
        ));
        assert!(store.has("k"));
        assert!(logs_contain("store.delete_refused"));

        link.destroy().unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.has("k"));
        assert!(!store.delete("k").unwrap());
    }

    #[test]
    #[traced_test]
    fn clear_is_all_or_nothing() {
        let store = Store::new("test");
        store.set_or_create("free", 1).unwrap();
        let link = store.set_and_link("held", 2, None).unwrap();

        assert_eq!(
            store.clear(),
            Err(StateError::StoreBusy {
                keys: vec!["held".to_string()]
            })
        );
        assert_eq!(store.len(), 2);
        assert!(logs_contain("store.clear_refused"));

        link.destroy().unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
    }

    proptest! {
        #[test]
        fn refused_clear_leaves_every_entry(
            entries in proptest::collection::btree_map("[a-z]{1,4}", any::<i32>(), 1..8),
            held in any::<prop::sample::Index>(),
        ) {
            let store = Store::new("prop");
            for (key, value) in &entries {
                store.set_or_create(key, *value).unwrap();
            }
            let keys: Vec<&String> = entries.keys().collect();
            let held_key = keys[held.index(keys.len())];
            let link = store.link(held_key, None).unwrap();

            prop_assert!(store.clear().is_err());
            prop_assert_eq!(store.len(), entries.len());
            for (key, value) in &entries {
                prop_assert_eq!(store.get(key).and_then(|v| v.as_number()), Some(f64::from(*value)));
            }
            link.destroy().unwrap();
            prop_assert!(store.clear().is_ok());
        }
    }

    #[test]
    fn owned_links_are_store_backed() {
        let store = Store::new("test");
        store.set_or_create("theme", "light").unwrap();
        let node = ComponentNode::new("Screen");
        let link = store.link("theme", Some(&node)).unwrap();
        assert_eq!(link.origin(), Origin::Store);
        assert_eq!(node.bindings().len(), 1);
        assert_eq!(store.subscriber_count("theme"), Some(1));
        node.dispose().unwrap();
        assert_eq!(store.subscriber_count("theme"), Some(0));
    }

    #[test]
    fn global_store_is_a_singleton() {
        let a = AppStore::global();
        let b = AppStore::global();
        assert!(a.ptr_eq(&b));
        a.set_or_create("singleton-check", true).unwrap();
        assert!(b.has("singleton-check"));
        assert!(b.delete("singleton-check").unwrap());
    }
}
