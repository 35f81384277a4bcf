#![forbid(unsafe_code)]

//! Persistence adapter: mirrors selected store entries to a backend.
//!
//! [`PersistentStore::persist_prop`] attaches a mirror to one store entry.
//! The mirror is a detached two-way link with a watch callback; every change
//! of the entry (a `set`, or an in-place mutation of its object) writes a
//! detached copy of the value to the backend. Changes the backend reports
//! from another party are written into the store.
//!
//! While a key is persisted its entry has a subscriber (the mirror), so the
//! store refuses to delete it; call [`PersistentStore::delete_prop`] first.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use sprig_core::{Value, detach};

use super::Store;
use super::backend::{ChangeListener, KeyValueBackend};
use crate::binding::Binding;
use crate::error::{Result, StateError};

struct PersistInner {
    store: Store,
    backend: Rc<dyn KeyValueBackend>,
    mirrors: RefCell<BTreeMap<String, Binding>>,
    /// Set while a backend-reported change is written into the store.
    applying_external: Cell<bool>,
}

/// Handle to a persistence adapter.
#[derive(Clone)]
pub struct PersistentStore {
    inner: Rc<PersistInner>,
}

impl PersistentStore {
    /// Attach `backend` to `store`.
    pub fn new(store: Store, backend: Rc<dyn KeyValueBackend>) -> Self {
        let inner = Rc::new(PersistInner {
            store,
            backend,
            mirrors: RefCell::new(BTreeMap::new()),
            applying_external: Cell::new(false),
        });
        let weak = Rc::downgrade(&inner);
        let listener: ChangeListener = Rc::new(move |key: &str, value: Option<&Value>| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_external(key, value);
            }
        });
        inner.backend.set_change_listener(Some(listener));
        Self { inner }
    }

    /// Attach `backend` to the application store.
    pub fn global(backend: Rc<dyn KeyValueBackend>) -> Self {
        Self::new(super::AppStore::global(), backend)
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Start persisting `key`.
    ///
    /// The initial value is the backend's, else the store's, else
    /// `default`. Persisting a key twice is a no-op.
    pub fn persist_prop(&self, key: &str, default: impl Into<Value>) -> Result<()> {
        if self.inner.mirrors.borrow().contains_key(key) {
            tracing::debug!(message = "persist.already", key);
            return Ok(());
        }
        let stored = self.inner.backend.get(key)?;
        let source = match stored {
            Some(v) => {
                self.inner.store.set_or_create(key, v)?;
                "backend"
            }
            None if self.inner.store.has(key) => "store",
            None => {
                self.inner.store.set_or_create(key, default)?;
                "default"
            }
        };

        let current = self.inner.store.get(key).unwrap_or_default();
        if current.contains_function() {
            tracing::error!(message = "persist.unpersistable", key);
            return Err(StateError::Unpersistable {
                key: key.to_string(),
            });
        }

        let mirror = self.inner.store.link(key, None)?;
        let weak: Weak<PersistInner> = Rc::downgrade(&self.inner);
        let owned_key = key.to_string();
        mirror.watch(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.write_through(&owned_key);
            }
        });
        self.inner
            .mirrors
            .borrow_mut()
            .insert(key.to_string(), mirror);
        self.inner.write_through(key);
        tracing::debug!(message = "persist.prop", key, source);
        Ok(())
    }

    /// [`persist_prop`](Self::persist_prop) for several keys.
    pub fn persist_props<K: AsRef<str>>(
        &self,
        entries: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<()> {
        for (key, default) in entries {
            self.persist_prop(key.as_ref(), default)?;
        }
        Ok(())
    }

    /// Stop persisting `key` and remove it from the backend. The store
    /// entry stays.
    pub fn delete_prop(&self, key: &str) -> Result<bool> {
        let Some(mirror) = self.inner.mirrors.borrow_mut().remove(key) else {
            return Ok(false);
        };
        mirror.destroy()?;
        self.inner.backend.delete(key)?;
        tracing::debug!(message = "persist.delete", key);
        Ok(true)
    }

    /// Persisted keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.mirrors.borrow().keys().cloned().collect()
    }
}

impl PersistInner {
    fn write_through(&self, key: &str) {
        if self.applying_external.get() {
            return;
        }
        let Some(value) = self.store.get(key) else {
            return;
        };
        if value.contains_function() {
            tracing::error!(message = "persist.unpersistable", key);
            return;
        }
        if let Err(err) = self.backend.set(key, &detach(&value)) {
            tracing::error!(message = "persist.write_failed", key, %err);
        } else {
            tracing::trace!(message = "persist.write", key);
        }
    }

    fn apply_external(&self, key: &str, value: Option<&Value>) {
        if !self.mirrors.borrow().contains_key(key) {
            return;
        }
        let Some(value) = value else {
            tracing::debug!(message = "persist.external_delete_ignored", key);
            return;
        };
        self.applying_external.set(true);
        let applied = self.store.set(key, value.clone());
        self.applying_external.set(false);
        if let Err(err) = applied {
            tracing::error!(message = "persist.external_apply_failed", key, %err);
        }
    }
}

impl fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStore")
            .field("store", &self.inner.store.label())
            .field("keys", &self.keys())
            .finish()
    }
}
