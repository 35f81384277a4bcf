#![forbid(unsafe_code)]

//! Environment adapter: seeds store entries from host signals.
//!
//! The host (platform shell, test harness) exposes read-only signals such as
//! the language or color mode through [`HostSignals`]. [`Environment`]
//! copies the signals the application asks for into the store and keeps
//! them current as the host reports changes. Data only flows host to store;
//! writes to those store entries never reach the host.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fmt;
use std::rc::{Rc, Weak};

use sprig_core::Value;

use super::Store;
use super::backend::ChangeListener;
use crate::error::Result;

pub const LANGUAGE_CODE: &str = "languageCode";
pub const COLOR_MODE: &str = "colorMode";
pub const FONT_SCALE: &str = "fontScale";
pub const FONT_WEIGHT_SCALE: &str = "fontWeightScale";
pub const ACCESSIBILITY_ENABLED: &str = "accessibilityEnabled";
pub const LAYOUT_DIRECTION: &str = "layoutDirection";

/// Read-only signals provided by the host.
pub trait HostSignals {
    fn read(&self, key: &str) -> Option<Value>;
    /// Install the callback the host invokes when a signal changes.
    fn set_change_listener(&self, listener: Option<ChangeListener>);
}

/// Host signals held in memory.
#[derive(Default)]
pub struct StaticHost {
    values: RefCell<BTreeMap<String, Value>>,
    listener: RefCell<Option<ChangeListener>>,
}

impl StaticHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style signal.
    #[must_use]
    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        self.values.borrow_mut().insert(key.to_string(), value.into());
        self
    }

    /// Host seeded from the process environment: `languageCode` from
    /// `LC_ALL`, then `LANG`, falling back to `en`.
    #[must_use]
    pub fn from_system() -> Self {
        let lc_all = env::var("LC_ALL").ok();
        let lang = env::var("LANG").ok();
        Self::new().with(
            LANGUAGE_CODE,
            detect_language_from(lc_all.as_deref(), lang.as_deref()),
        )
    }

    /// Change a signal and tell the listener.
    pub fn update(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        self.values.borrow_mut().insert(key.to_string(), value.clone());
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener {
            listener(key, Some(&value));
        }
    }
}

impl HostSignals for StaticHost {
    fn read(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    fn set_change_listener(&self, listener: Option<ChangeListener>) {
        *self.listener.borrow_mut() = listener;
    }
}

fn detect_language_from(lc_all: Option<&str>, lang: Option<&str>) -> String {
    lc_all
        .and_then(normalize_locale)
        .or_else(|| lang.and_then(normalize_locale))
        .unwrap_or_else(|| "en".to_string())
}

fn normalize_locale(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let raw = raw.split('@').next().unwrap_or(raw);
    let raw = raw.split('.').next().unwrap_or(raw).trim();
    if raw.is_empty() {
        return None;
    }
    if raw.eq_ignore_ascii_case("c") || raw.eq_ignore_ascii_case("posix") {
        return Some("en".to_string());
    }
    Some(raw.replace('_', "-"))
}

struct EnvInner {
    store: Store,
    host: Rc<dyn HostSignals>,
    keys: RefCell<BTreeSet<String>>,
}

/// Handle to an environment adapter.
#[derive(Clone)]
pub struct Environment {
    inner: Rc<EnvInner>,
}

impl Environment {
    pub fn new(store: Store, host: Rc<dyn HostSignals>) -> Self {
        let inner = Rc::new(EnvInner {
            store,
            host,
            keys: RefCell::new(BTreeSet::new()),
        });
        let weak: Weak<EnvInner> = Rc::downgrade(&inner);
        inner.host.set_change_listener(Some(Rc::new(
            move |key: &str, value: Option<&Value>| {
                if let (Some(inner), Some(value)) = (weak.upgrade(), value) {
                    inner.host_changed(key, value);
                }
            },
        )));
        Self { inner }
    }

    /// Attach `host` to the application store.
    pub fn global(host: Rc<dyn HostSignals>) -> Self {
        Self::new(super::AppStore::global(), host)
    }

    /// Seed store entry `key` from the host, or from `default` when the host
    /// has no such signal.
    ///
    /// Returns `false`, leaving the entry alone, when the store already holds
    /// `key`.
    pub fn env_prop(&self, key: &str, default: impl Into<Value>) -> Result<bool> {
        if self.inner.store.has(key) {
            tracing::warn!(message = "env.key_taken", key);
            return Ok(false);
        }
        let value = self.inner.host.read(key).unwrap_or_else(|| default.into());
        self.inner.store.set_or_create(key, value)?;
        self.inner.keys.borrow_mut().insert(key.to_string());
        tracing::debug!(message = "env.prop", key);
        Ok(true)
    }

    /// [`env_prop`](Self::env_prop) for several keys; returns how many were
    /// seeded.
    pub fn env_props<K: AsRef<str>>(
        &self,
        entries: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<usize> {
        let mut seeded = 0;
        for (key, default) in entries {
            if self.env_prop(key.as_ref(), default)? {
                seeded += 1;
            }
        }
        Ok(seeded)
    }

    /// Keys seeded by this adapter.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.keys.borrow().iter().cloned().collect()
    }
}

impl EnvInner {
    fn host_changed(&self, key: &str, value: &Value) {
        if !self.keys.borrow().contains(key) {
            return;
        }
        if let Err(err) = self.store.set(key, value.clone()) {
            tracing::error!(message = "env.apply_failed", key, %err);
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("store", &self.inner.store.label())
            .field("keys", &self.keys())
            .finish()
    }
}
