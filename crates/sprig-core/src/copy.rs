#![forbid(unsafe_code)]

//! Snapshot copies for one-way bindings and persistence.
//!
//! [`deep_copy`] walks the object graph once, memoizing every object it has
//! already copied by address, so shared substructure stays shared in the
//! copy and reference cycles terminate. Wrapped nested values are rewrapped
//! in the copy; the fresh wrappers have no owners until a binding claims
//! them.

use ahash::AHashMap;

use crate::observed::ObservedObject;
use crate::value::{Compound, Object, Value};

/// Copy the top level of a compound; nested values are shared.
#[must_use]
pub fn shallow_copy(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return value.clone();
    };
    let copy = Object::new(obj.borrow().clone());
    rewrap_like(value, copy)
}

/// Copy a value and everything reachable from it.
#[must_use]
pub fn deep_copy(value: &Value) -> Value {
    copy_graph(value, &mut AHashMap::new(), true)
}

/// Deep copy with every wrapper stripped.
///
/// The result shares nothing with the input and notifies nobody when
/// written, which is what an external backend should receive.
#[must_use]
pub fn detach(value: &Value) -> Value {
    copy_graph(value, &mut AHashMap::new(), false)
}

fn rewrap_like(original: &Value, copy: Object) -> Value {
    match original {
        Value::Observed(_) => Value::Observed(ObservedObject::wrap(&copy, None)),
        _ => Value::Object(copy),
    }
}

fn copy_graph(value: &Value, memo: &mut AHashMap<usize, Object>, keep_wrappers: bool) -> Value {
    let Some(source) = value.as_object() else {
        return value.clone();
    };
    let wrap = |copy: Object| {
        if keep_wrappers {
            rewrap_like(value, copy)
        } else {
            Value::Object(copy)
        }
    };
    if let Some(done) = memo.get(&source.addr()) {
        return wrap(done.clone());
    }

    let data = source.borrow();
    let shell = Object::new(data.empty_like());
    memo.insert(source.addr(), shell.clone());

    let mut child = |v: &Value| copy_graph(v, memo, keep_wrappers);
    let filled = match &*data {
        Compound::Record { class, fields } => Compound::Record {
            class: class.clone(),
            fields: fields.iter().map(|(k, v)| (k.clone(), child(v))).collect(),
        },
        Compound::Array(items) => Compound::Array(items.iter().map(&mut child).collect()),
        Compound::Set(items) => Compound::Set(items.iter().map(&mut child).collect()),
        Compound::Map(entries) => {
            Compound::Map(entries.iter().map(|(k, v)| (child(k), child(v))).collect())
        }
        Compound::Date(ms) => Compound::Date(*ms),
    };
    drop(data);
    *shell.borrow_mut() = filled;
    wrap(shell)
}
