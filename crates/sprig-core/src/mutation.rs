#![forbid(unsafe_code)]

//! In-place mutating calls on compound values.
//!
//! Each [`Mutation`] mirrors one array, date, map or set method that changes
//! its receiver. Applied through an [`ObservedObject`](crate::ObservedObject)
//! the call notifies every owning binding; applied through
//! [`Object::apply_raw`](crate::Object::apply_raw) it does not.

use std::cmp::Ordering;

use crate::value::{Compound, CompoundKind, Object, Value};

/// An in-place mutating call.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Append items to an array. Result: new length.
    Push(Vec<Value>),
    /// Remove the last array item. Result: the item, or `Undefined`.
    Pop,
    /// Remove the first array item. Result: the item, or `Undefined`.
    Shift,
    /// Prepend items to an array. Result: new length.
    Unshift(Vec<Value>),
    /// Remove and insert array items. Result: a new array of removed items.
    ///
    /// A negative `start` counts from the end. `delete_count: None` removes
    /// everything from `start` on.
    Splice {
        start: isize,
        delete_count: Option<usize>,
        items: Vec<Value>,
    },
    /// Stable sort: numbers ascending, then strings, then everything else in
    /// original order. Result: the receiver.
    Sort,
    /// Reverse an array. Result: the receiver.
    Reverse,
    /// Overwrite every array item. Result: the receiver.
    Fill(Value),
    /// Set a date's time. Result: the new time.
    SetTime(i64),
    /// Insert or replace a map entry. Result: the receiver.
    MapSet(Value, Value),
    /// Remove a map entry. Result: whether it existed.
    MapDelete(Value),
    /// Add a set member. Result: the receiver.
    SetAdd(Value),
    /// Remove a set member. Result: whether it existed.
    SetDelete(Value),
    /// Empty a map or set. Result: `Undefined`.
    Clear,
}

impl Mutation {
    /// Method name reported to owners.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Push(_) => "push",
            Self::Pop => "pop",
            Self::Shift => "shift",
            Self::Unshift(_) => "unshift",
            Self::Splice { .. } => "splice",
            Self::Sort => "sort",
            Self::Reverse => "reverse",
            Self::Fill(_) => "fill",
            Self::SetTime(_) => "setTime",
            Self::MapSet(..) => "set",
            Self::MapDelete(_) => "delete",
            Self::SetAdd(_) => "add",
            Self::SetDelete(_) => "delete",
            Self::Clear => "clear",
        }
    }

    /// Replace every argument by its raw counterpart.
    #[must_use]
    pub(crate) fn unwrap_args(self) -> Self {
        let raw = crate::observed::unwrap_value;
        match self {
            Self::Push(items) => Self::Push(items.iter().map(raw).collect()),
            Self::Unshift(items) => Self::Unshift(items.iter().map(raw).collect()),
            Self::Splice {
                start,
                delete_count,
                items,
            } => Self::Splice {
                start,
                delete_count,
                items: items.iter().map(raw).collect(),
            },
            Self::Fill(v) => Self::Fill(raw(&v)),
            Self::MapSet(k, v) => Self::MapSet(raw(&k), raw(&v)),
            Self::MapDelete(k) => Self::MapDelete(raw(&k)),
            Self::SetAdd(v) => Self::SetAdd(raw(&v)),
            Self::SetDelete(v) => Self::SetDelete(raw(&v)),
            other => other,
        }
    }

    pub(crate) fn apply(self, data: &mut Compound) -> Result<Outcome, MutationError> {
        let call = self.name();
        let kind = data.kind();
        let not_applicable = || MutationError::NotApplicable { call, kind };
        match (self, data) {
            (Self::Push(new), Compound::Array(items)) => {
                items.extend(new);
                Ok(Outcome::Value(len_value(items.len())))
            }
            (Self::Pop, Compound::Array(items)) => {
                Ok(Outcome::Value(items.pop().unwrap_or_default()))
            }
            (Self::Shift, Compound::Array(items)) => Ok(Outcome::Value(if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            })),
            (Self::Unshift(new), Compound::Array(items)) => {
                items.splice(0..0, new);
                Ok(Outcome::Value(len_value(items.len())))
            }
            (
                Self::Splice {
                    start,
                    delete_count,
                    items: new,
                },
                Compound::Array(items),
            ) => {
                let len = items.len();
                let from = if start < 0 {
                    len.saturating_sub(start.unsigned_abs())
                } else {
                    start.unsigned_abs().min(len)
                };
                let to = delete_count.map_or(len, |n| from.saturating_add(n).min(len));
                let removed: Vec<Value> = items.splice(from..to, new).collect();
                Ok(Outcome::Value(Value::Object(Object::array(removed))))
            }
            (Self::Sort, Compound::Array(items)) => {
                items.sort_by(sort_order);
                Ok(Outcome::Receiver)
            }
            (Self::Reverse, Compound::Array(items)) => {
                items.reverse();
                Ok(Outcome::Receiver)
            }
            (Self::Fill(v), Compound::Array(items)) => {
                items.iter_mut().for_each(|item| *item = v.clone());
                Ok(Outcome::Receiver)
            }
            (Self::SetTime(ms), Compound::Date(time)) => {
                *time = ms;
                Ok(Outcome::Value(Value::Number(ms as f64)))
            }
            (Self::MapSet(k, v), Compound::Map(entries)) => {
                match entries.iter_mut().find(|(key, _)| key.same_value(&k)) {
                    Some(entry) => entry.1 = v,
                    None => entries.push((k, v)),
                }
                Ok(Outcome::Receiver)
            }
            (Self::MapDelete(k), Compound::Map(entries)) => {
                let before = entries.len();
                entries.retain(|(key, _)| !key.same_value(&k));
                Ok(Outcome::Value(Value::Bool(entries.len() != before)))
            }
            (Self::SetAdd(v), Compound::Set(items)) => {
                if !items.iter().any(|i| i.same_value(&v)) {
                    items.push(v);
                }
                Ok(Outcome::Receiver)
            }
            (Self::SetDelete(v), Compound::Set(items)) => {
                let before = items.len();
                items.retain(|i| !i.same_value(&v));
                Ok(Outcome::Value(Value::Bool(items.len() != before)))
            }
            (Self::Clear, Compound::Map(entries)) => {
                entries.clear();
                Ok(Outcome::Value(Value::Undefined))
            }
            (Self::Clear, Compound::Set(items)) => {
                items.clear();
                Ok(Outcome::Value(Value::Undefined))
            }
            _ => Err(not_applicable()),
        }
    }
}

/// What a mutating call returned.
pub(crate) enum Outcome {
    Value(Value),
    /// The call returned its receiver.
    Receiver,
}

/// A mutation that the receiver does not support.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    #[error("`{call}` cannot be applied to a {}", kind.name())]
    NotApplicable {
        call: &'static str,
        kind: CompoundKind,
    },
    #[error("property `{key}` of a {} is not writable", kind.name())]
    NotWritable { key: String, kind: CompoundKind },
    #[error("array property `{key}` is out of range (limit {limit})")]
    OutOfRange { key: String, limit: u32 },
}

fn len_value(len: usize) -> Value {
    Value::Number(len as f64)
}

fn sort_rank(v: &Value) -> u8 {
    match v {
        Value::Number(_) => 0,
        Value::Str(_) => 1,
        _ => 2,
    }
}

fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => sort_rank(a).cmp(&sort_rank(b)),
    }
}
