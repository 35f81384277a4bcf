#![forbid(unsafe_code)]

//! Key/value backends for the persistence adapter.
//!
//! The adapter treats its backend as opaque: it hands over detached values
//! and reads values back. [`MemoryBackend`] keeps everything in memory and
//! can simulate writes by another party; the JSON [`FileBackend`] (feature
//! `state-persistence`) stores one document per backend.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use sprig_core::Value;

use crate::error::Result;

/// Called when the backend changes behind the adapter's back.
///
/// `None` means the key was deleted.
pub type ChangeListener = Rc<dyn Fn(&str, Option<&Value>)>;

/// Storage used by [`PersistentStore`](super::PersistentStore).
///
/// Writes made through this trait must not invoke the change listener; the
/// listener reports changes made by someone else.
pub trait KeyValueBackend {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
    fn set_change_listener(&self, listener: Option<ChangeListener>);
}

/// In-memory backend.
#[derive(Default)]
pub struct MemoryBackend {
    data: RefCell<BTreeMap<String, Value>>,
    listener: RefCell<Option<ChangeListener>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-filled with `entries`.
    pub fn with_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let backend = Self::new();
        backend
            .data
            .borrow_mut()
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v)));
        backend
    }

    /// Write as another party would, notifying the listener.
    pub fn external_set(&self, key: &str, value: Value) {
        self.data.borrow_mut().insert(key.to_string(), value.clone());
        self.fire(key, Some(&value));
    }

    /// Delete as another party would, notifying the listener.
    pub fn external_delete(&self, key: &str) {
        self.data.borrow_mut().remove(key);
        self.fire(key, None);
    }

    fn fire(&self, key: &str, value: Option<&Value>) {
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener {
            listener(key, value);
        }
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.data.borrow_mut().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data.borrow_mut().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.data.borrow_mut().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.data.borrow().keys().cloned().collect())
    }

    fn set_change_listener(&self, listener: Option<ChangeListener>) {
        *self.listener.borrow_mut() = listener;
    }
}

#[cfg(feature = "state-persistence")]
pub use file::FileBackend;

#[cfg(feature = "state-persistence")]
mod file {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    use sprig_core::Value;

    use super::{ChangeListener, KeyValueBackend};
    use crate::error::{Result, StateError};
    use crate::store::json;

    /// JSON document on disk, rewritten atomically on every change.
    ///
    /// A missing file starts empty; a corrupt file is reported at open.
    pub struct FileBackend {
        path: PathBuf,
        data: RefCell<BTreeMap<String, serde_json::Value>>,
        listener: RefCell<Option<ChangeListener>>,
    }

    impl FileBackend {
        pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
            let path = path.into();
            let data = match fs::read_to_string(&path) {
                Ok(text) => serde_json::from_str(&text).map_err(|e| backend_error(&path, e))?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
                Err(e) => return Err(backend_error(&path, e)),
            };
            tracing::debug!(message = "persist.file_open", path = %path.display());
            Ok(Self {
                path,
                data: RefCell::new(data),
                listener: RefCell::new(None),
            })
        }

        #[must_use]
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Re-read the file and report every key whose content changed.
        pub fn reload(&self) -> Result<usize> {
            let text = match fs::read_to_string(&self.path) {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::from("{}"),
                Err(e) => return Err(backend_error(&self.path, e)),
            };
            let fresh: BTreeMap<String, serde_json::Value> =
                serde_json::from_str(&text).map_err(|e| backend_error(&self.path, e))?;
            let old = self.data.replace(fresh.clone());

            let mut changed: Vec<(String, Option<Value>)> = Vec::new();
            for (key, doc) in &fresh {
                if old.get(key) != Some(doc) {
                    changed.push((key.clone(), Some(json::decode(doc))));
                }
            }
            for key in old.keys().filter(|k| !fresh.contains_key(*k)) {
                changed.push((key.clone(), None));
            }
            let listener = self.listener.borrow().clone();
            if let Some(listener) = listener {
                for (key, value) in &changed {
                    listener(key, value.as_ref());
                }
            }
            Ok(changed.len())
        }

        fn flush(&self) -> Result<()> {
            let text = serde_json::to_string_pretty(&*self.data.borrow())
                .map_err(|e| backend_error(&self.path, e))?;
            let tmp = self.path.with_extension("tmp");
            let mut file = fs::File::create(&tmp).map_err(|e| backend_error(&tmp, e))?;
            file.write_all(text.as_bytes())
                .and_then(|()| file.sync_all())
                .map_err(|e| backend_error(&tmp, e))?;
            fs::rename(&tmp, &self.path).map_err(|e| backend_error(&self.path, e))
        }
    }

    fn backend_error(path: &Path, err: impl std::fmt::Display) -> StateError {
        tracing::error!(message = "persist.file_error", path = %path.display(), %err);
        StateError::Backend {
            message: format!("{}: {err}", path.display()),
        }
    }

    impl KeyValueBackend for FileBackend {
        fn get(&self, key: &str) -> Result<Option<Value>> {
            Ok(self.data.borrow().get(key).map(json::decode))
        }

        fn set(&self, key: &str, value: &Value) -> Result<()> {
            let doc = json::encode(value).map_err(|_| StateError::Unpersistable {
                key: key.to_string(),
            })?;
            self.data.borrow_mut().insert(key.to_string(), doc);
            self.flush()
        }

        fn delete(&self, key: &str) -> Result<()> {
            if self.data.borrow_mut().remove(key).is_some() {
                self.flush()?;
            }
            Ok(())
        }

        fn clear(&self) -> Result<()> {
            self.data.borrow_mut().clear();
            self.flush()
        }

        fn keys(&self) -> Result<Vec<String>> {
            Ok(self.data.borrow().keys().cloned().collect())
        }

        fn set_change_listener(&self, listener: Option<ChangeListener>) {
            *self.listener.borrow_mut() = listener;
        }
    }

}
