#![forbid(unsafe_code)]

//! Dynamic values stored in bindings.
//!
//! Application data is modelled as a small dynamic [`Value`] type. Scalars
//! are held inline; compound data (records, arrays, dates, maps, sets) lives
//! in a shared, mutable [`Object`] cell so that several bindings and UI
//! elements can refer to the same instance and observe its in-place
//! mutation.
//!
//! # Equality
//!
//! Two notions are used throughout the engine:
//!
//! - [`Value::same_value`] is the change test for `set()`: primitives compare
//!   by value (an unchanged `NaN` counts as unchanged), compounds by identity
//!   of the raw target (a wrapper and its raw object are the same object),
//!   functions by pointer.
//! - [`deep_eq`] compares structure and is used when a one-way projection
//!   re-snapshots its source. It terminates on cyclic data.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;

use crate::mutation::{Mutation, MutationError, Outcome};
use crate::observed::{ObservedInner, ObservedObject};

/// A callable value.
///
/// Functions may be passed around as values (event handlers, formatters),
/// but they are never a legal shape for observed state.
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn(&[Value]) -> Value>);

impl Callback {
    /// Wrap a closure.
    pub fn new(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    /// Pointer identity.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A dynamic value.
#[derive(Clone, Default)]
pub enum Value {
    /// No value.
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// Text.
    Str(Rc<str>),
    /// A compound value that is not (yet) observed.
    Object(Object),
    /// A compound value behind an observation wrapper.
    Observed(ObservedObject),
    /// A callable.
    Function(Callback),
}

impl Value {
    /// Text value.
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    /// Whether this is `Undefined` or `Null`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Whether this is a scalar (not a compound, not a function).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Undefined | Self::Null | Self::Bool(_) | Self::Number(_) | Self::Str(_)
        )
    }

    /// Whether this holds compound data (raw or observed).
    #[must_use]
    pub fn is_compound(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Observed(_))
    }

    /// Numeric payload.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean payload.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Text payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The raw object behind a compound value, wrapped or not.
    #[must_use]
    pub fn as_object(&self) -> Option<Object> {
        match self {
            Self::Object(o) => Some(o.clone()),
            Self::Observed(o) => Some(o.unwrap()),
            _ => None,
        }
    }

    /// The observation wrapper, if this value is observed.
    #[must_use]
    pub fn as_observed(&self) -> Option<&ObservedObject> {
        match self {
            Self::Observed(o) => Some(o),
            _ => None,
        }
    }

    /// Short type tag used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Object(o) => o.kind().name(),
            Self::Observed(o) => o.unwrap().kind().name(),
            Self::Function(_) => "function",
        }
    }

    /// Identity/value comparison used to detect no-op writes.
    #[must_use]
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (a, b) if a.is_compound() && b.is_compound() => match (a.as_object(), b.as_object()) {
                (Some(x), Some(y)) => x.ptr_eq(&y),
                _ => false,
            },
            _ => false,
        }
    }

    /// Whether a function appears anywhere inside this value.
    #[must_use]
    pub fn contains_function(&self) -> bool {
        fn walk(v: &Value, seen: &mut AHashSet<usize>) -> bool {
            match v {
                Value::Function(_) => true,
                Value::Object(_) | Value::Observed(_) => {
                    let Some(obj) = v.as_object() else {
                        return false;
                    };
                    if !seen.insert(obj.addr()) {
                        return false;
                    }
                    let data = obj.borrow();
                    data.children().any(|child| walk(child, seen))
                }
                _ => false,
            }
        }
        walk(self, &mut AHashSet::new())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v.into())
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Self::Object(v)
    }
}

impl From<ObservedObject> for Value {
    fn from(v: ObservedObject) -> Self {
        Self::Observed(v)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Object(o) => write!(f, "{o:?}"),
            Self::Observed(o) => write!(f, "Observed({:?})", o.unwrap()),
            Self::Function(_) => f.write_str("function"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            other => write!(f, "{other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Compound data
// ---------------------------------------------------------------------------

/// Kind of compound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundKind {
    Record,
    Array,
    Date,
    Map,
    Set,
}

impl CompoundKind {
    /// Lowercase name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Record => "object",
            Self::Array => "array",
            Self::Date => "date",
            Self::Map => "map",
            Self::Set => "set",
        }
    }
}

/// The payload of an [`Object`].
#[derive(Clone)]
pub enum Compound {
    /// Named fields. `class` tags instances of a user-defined observable type.
    Record {
        class: Option<Rc<str>>,
        fields: BTreeMap<String, Value>,
    },
    /// Ordered items.
    Array(Vec<Value>),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    /// Insertion-ordered key/value pairs; keys compare with `same_value`.
    Map(Vec<(Value, Value)>),
    /// Insertion-ordered unique items; membership uses `same_value`.
    Set(Vec<Value>),
}

impl Compound {
    /// Kind tag.
    #[must_use]
    pub fn kind(&self) -> CompoundKind {
        match self {
            Self::Record { .. } => CompoundKind::Record,
            Self::Array(_) => CompoundKind::Array,
            Self::Date(_) => CompoundKind::Date,
            Self::Map(_) => CompoundKind::Map,
            Self::Set(_) => CompoundKind::Set,
        }
    }

    /// An empty compound of the same kind (and class).
    #[must_use]
    pub fn empty_like(&self) -> Self {
        match self {
            Self::Record { class, .. } => Self::Record {
                class: class.clone(),
                fields: BTreeMap::new(),
            },
            Self::Array(_) => Self::Array(Vec::new()),
            Self::Date(ms) => Self::Date(*ms),
            Self::Map(_) => Self::Map(Vec::new()),
            Self::Set(_) => Self::Set(Vec::new()),
        }
    }

    /// Every nested value (map keys included).
    pub fn children(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Self::Record { fields, .. } => Box::new(fields.values()),
            Self::Array(items) | Self::Set(items) => Box::new(items.iter()),
            Self::Date(_) => Box::new(std::iter::empty()),
            Self::Map(entries) => Box::new(entries.iter().flat_map(|(k, v)| [k, v])),
        }
    }

    /// Number of top-level entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Record { fields, .. } => fields.len(),
            Self::Array(items) | Self::Set(items) => items.len(),
            Self::Date(_) => 1,
            Self::Map(entries) => entries.len(),
        }
    }

    /// Whether there are no top-level entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) struct ObjectCell {
    data: RefCell<Compound>,
    /// Marker for the live observation wrapper, if any.
    wrapper: RefCell<Weak<ObservedInner>>,
}

/// Shared handle to mutable compound data.
///
/// Cloning an `Object` clones the handle, not the data. Writes through an
/// `Object` are raw: nobody is notified. Use an [`ObservedObject`] for
/// observable writes.
#[derive(Clone)]
pub struct Object {
    cell: Rc<ObjectCell>,
}

impl Object {
    /// Wrap compound data in a new shared cell.
    #[must_use]
    pub fn new(data: Compound) -> Self {
        Self {
            cell: Rc::new(ObjectCell {
                data: RefCell::new(data),
                wrapper: RefCell::new(Weak::new()),
            }),
        }
    }

    /// A plain record.
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::new(Compound::Record {
            class: None,
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        })
    }

    /// A record tagged as an instance of a user-defined observable class.
    pub fn instance<K: Into<String>>(
        class: impl Into<Rc<str>>,
        fields: impl IntoIterator<Item = (K, Value)>,
    ) -> Self {
        Self::new(Compound::Record {
            class: Some(class.into()),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        })
    }

    /// An array.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::new(Compound::Array(items.into_iter().collect()))
    }

    /// A date at `millis` since the epoch.
    #[must_use]
    pub fn date(millis: i64) -> Self {
        Self::new(Compound::Date(millis))
    }

    /// A map.
    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self::new(Compound::Map(entries.into_iter().collect()))
    }

    /// A set; duplicate items are dropped.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        let mut unique: Vec<Value> = Vec::new();
        for item in items {
            if !unique.iter().any(|u| u.same_value(&item)) {
                unique.push(item);
            }
        }
        Self::new(Compound::Set(unique))
    }

    /// Identity comparison.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Address of the shared cell; stable for the object's lifetime.
    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell) as *const () as usize
    }

    /// Borrow the payload.
    ///
    /// # Panics
    ///
    /// Panics if the payload is currently mutably borrowed, which only happens
    /// while a mutation is being applied.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, Compound> {
        self.cell.data.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, Compound> {
        self.cell.data.borrow_mut()
    }

    /// Kind of the payload.
    #[must_use]
    pub fn kind(&self) -> CompoundKind {
        self.borrow().kind()
    }

    /// User class name, for records created with [`Object::instance`].
    #[must_use]
    pub fn class(&self) -> Option<Rc<str>> {
        match &*self.borrow() {
            Compound::Record { class, .. } => class.clone(),
            _ => None,
        }
    }

    /// Whether a live observation wrapper exists for this object.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.cell.wrapper.borrow().strong_count() > 0
    }

    pub(crate) fn wrapper(&self) -> Option<Rc<ObservedInner>> {
        self.cell.wrapper.borrow().upgrade()
    }

    pub(crate) fn set_wrapper(&self, wrapper: &Rc<ObservedInner>) {
        *self.cell.wrapper.borrow_mut() = Rc::downgrade(wrapper);
    }

    /// Read a property.
    ///
    /// Records read fields by name, arrays by decimal index or `length`, maps
    /// and sets expose `size`, dates expose `time`. Anything else reads as
    /// `Undefined`.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        match &*self.borrow() {
            Compound::Record { fields, .. } => fields.get(key).cloned().unwrap_or_default(),
            Compound::Array(items) => match key {
                "length" => Value::Number(items.len() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            },
            Compound::Date(ms) if key == "time" => Value::Number(*ms as f64),
            Compound::Map(entries) if key == "size" => Value::Number(entries.len() as f64),
            Compound::Set(items) if key == "size" => Value::Number(items.len() as f64),
            _ => Value::Undefined,
        }
    }

    /// Look up a map entry.
    #[must_use]
    pub fn map_get(&self, key: &Value) -> Option<Value> {
        match &*self.borrow() {
            Compound::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.same_value(key))
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    /// Set membership test.
    #[must_use]
    pub fn contains(&self, item: &Value) -> bool {
        match &*self.borrow() {
            Compound::Set(items) | Compound::Array(items) => {
                items.iter().any(|i| i.same_value(item))
            }
            _ => false,
        }
    }

    /// Raw property write. Nobody is notified.
    ///
    /// Writable properties are record fields, array indices (writing past the
    /// end pads with `Undefined`) and array `length`. Lengths above
    /// [`MAX_ARRAY_LENGTH`] and indices at or above it are out of range.
    pub fn set_raw(&self, key: &str, value: Value) -> Result<(), MutationError> {
        let mut data = self.borrow_mut();
        match &mut *data {
            Compound::Record { fields, .. } => {
                fields.insert(key.to_string(), value);
                Ok(())
            }
            Compound::Array(items) => {
                if key == "length" {
                    let len = value
                        .as_number()
                        .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                        .ok_or_else(|| MutationError::NotWritable {
                            key: key.to_string(),
                            kind: CompoundKind::Array,
                        })?;
                    if len > MAX_ARRAY_LENGTH as f64 {
                        return Err(out_of_range(key));
                    }
                    let len = len as usize;
                    grow_to(items, len, key)?;
                    items.truncate(len);
                    return Ok(());
                }
                let index = key.parse::<usize>().map_err(|_| MutationError::NotWritable {
                    key: key.to_string(),
                    kind: CompoundKind::Array,
                })?;
                if index >= MAX_ARRAY_LENGTH as usize {
                    return Err(out_of_range(key));
                }
                grow_to(items, index + 1, key)?;
                if let Some(slot) = items.get_mut(index) {
                    *slot = value;
                }
                Ok(())
            }
            other => Err(MutationError::NotWritable {
                key: key.to_string(),
                kind: other.kind(),
            }),
        }
    }

    /// Apply an in-place mutating call without notifying anyone.
    ///
    /// Calls that return their receiver yield this raw object.
    pub fn apply_raw(&self, mutation: Mutation) -> Result<Value, MutationError> {
        let outcome = {
            let mut data = self.borrow_mut();
            mutation.apply(&mut data)?
        };
        Ok(match outcome {
            Outcome::Value(v) => v,
            Outcome::Receiver => Value::Object(self.clone()),
        })
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow: object graphs may be cyclic.
        let data = self.borrow();
        match &*data {
            Compound::Record {
                class: Some(class),
                fields,
            } => write!(f, "{class}{{{} fields}}", fields.len()),
            Compound::Record { fields, .. } => write!(f, "object{{{} fields}}", fields.len()),
            Compound::Array(items) => write!(f, "array[{}]", items.len()),
            Compound::Date(ms) => write!(f, "date({ms})"),
            Compound::Map(entries) => write!(f, "map[{}]", entries.len()),
            Compound::Set(items) => write!(f, "set[{}]", items.len()),
        }
    }
}

/// Largest array length a property write may produce.
pub const MAX_ARRAY_LENGTH: u32 = u32::MAX;

fn out_of_range(key: &str) -> MutationError {
    MutationError::OutOfRange {
        key: key.to_string(),
        limit: MAX_ARRAY_LENGTH,
    }
}

/// Pad `items` with `Undefined` up to `len`, failing instead of aborting when
/// the allocation cannot be made.
fn grow_to(items: &mut Vec<Value>, len: usize, key: &str) -> Result<(), MutationError> {
    let missing = len.saturating_sub(items.len());
    if missing == 0 {
        return Ok(());
    }
    items.try_reserve(missing).map_err(|_| out_of_range(key))?;
    items.resize(len, Value::Undefined);
    Ok(())
}

// ---------------------------------------------------------------------------
// Structural equality
// ---------------------------------------------------------------------------

/// Structural equality, cycle safe.
///
/// Compounds are equal when they have the same kind, class and (recursively)
/// equal contents; wrapped and unwrapped instances of equal data are equal.
/// A pair of objects already under comparison is assumed equal, which makes
/// the walk terminate on cyclic graphs.
#[must_use]
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    deep_eq_inner(a, b, &mut AHashSet::new())
}

fn deep_eq_inner(a: &Value, b: &Value, visiting: &mut AHashSet<(usize, usize)>) -> bool {
    if !(a.is_compound() && b.is_compound()) {
        return a.same_value(b);
    }
    let (Some(x), Some(y)) = (a.as_object(), b.as_object()) else {
        return false;
    };
    if x.ptr_eq(&y) || !visiting.insert((x.addr(), y.addr())) {
        return true;
    }
    let (dx, dy) = (x.borrow(), y.borrow());
    match (&*dx, &*dy) {
        (
            Compound::Record {
                class: ca,
                fields: fa,
            },
            Compound::Record {
                class: cb,
                fields: fb,
            },
        ) => {
            ca == cb
                && fa.len() == fb.len()
                && fa.iter().zip(fb.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb && deep_eq_inner(va, vb, visiting)
                })
        }
        (Compound::Array(ia), Compound::Array(ib)) | (Compound::Set(ia), Compound::Set(ib)) => {
            ia.len() == ib.len()
                && ia
                    .iter()
                    .zip(ib.iter())
                    .all(|(va, vb)| deep_eq_inner(va, vb, visiting))
        }
        (Compound::Date(ma), Compound::Date(mb)) => ma == mb,
        (Compound::Map(ea), Compound::Map(eb)) => {
            ea.len() == eb.len()
                && ea.iter().zip(eb.iter()).all(|((ka, va), (kb, vb))| {
                    deep_eq_inner(ka, kb, visiting) && deep_eq_inner(va, vb, visiting)
                })
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// Allowed-shape predicate a binding checks before accepting a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Primitive, undefined/null, or a non-function object.
    State,
    /// Object-shaped and not a function.
    Object,
}

impl Shape {
    /// Whether `value` satisfies the shape.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::State => !matches!(value, Value::Function(_)),
            Self::Object => value.is_compound(),
        }
    }

    /// Human-readable description for error messages.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::State => "primitive, undefined, or non-function object",
            Self::Object => "object-shaped value that is not a function",
        }
    }
}
