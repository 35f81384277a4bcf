#![forbid(unsafe_code)]

//! Observable Value Wrapper.
//!
//! An [`ObservedObject`] wraps a raw [`Object`] and funnels every write
//! through explicit methods so that in-place mutation is detectable. The
//! wrapper carries the set of owning binding ids; after a change it resolves
//! each owner through the subscriber registry and calls
//! [`Subscriber::on_object_changed`](crate::Subscriber::on_object_changed).
//!
//! # Invariants
//!
//! 1. An object is wrapped at most once. [`ObservedObject::wrap`] on an
//!    object that already has a live wrapper returns that wrapper, with the
//!    new owner merged into its owner set.
//! 2. Owners are notified with unproxied values: the payload of a change is
//!    always raw data, never a wrapper.
//! 3. Calls that return their receiver return the wrapper, so chained calls
//!    keep going through the interception layer.
//! 4. Writes that do not change the property (per `same_value`) notify
//!    nobody.
//!
//! The wrapper is never disposed automatically. When its owner set is empty
//! it is merely eligible for disposal: the last handle going away drops it.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::id::Id;
use crate::mutation::{Mutation, MutationError, Outcome};
use crate::registry;
use crate::value::{Object, Value};

/// A change delivered to the owners of an observed object.
#[derive(Debug, Clone, Copy)]
pub struct ObjectChange<'a> {
    /// The object that changed.
    pub object: &'a ObservedObject,
    /// Property name for writes, method name for mutating calls.
    pub property: &'a str,
    /// New property value, or the raw result of the mutating call.
    pub value: &'a Value,
}

pub(crate) struct ObservedInner {
    target: Object,
    owners: RefCell<BTreeSet<Id>>,
}

/// Handle to the interception layer around a raw object.
#[derive(Clone)]
pub struct ObservedObject {
    inner: Rc<ObservedInner>,
}

impl ObservedObject {
    /// Wrap `target`, or return its existing wrapper.
    ///
    /// `owner` joins the owner set either way.
    #[must_use]
    pub fn wrap(target: &Object, owner: Option<Id>) -> Self {
        let this = match target.wrapper() {
            Some(inner) => Self { inner },
            None => {
                let inner = Rc::new(ObservedInner {
                    target: target.clone(),
                    owners: RefCell::new(BTreeSet::new()),
                });
                target.set_wrapper(&inner);
                tracing::trace!(message = "observed.wrap", object = ?target);
                Self { inner }
            }
        };
        if let Some(owner) = owner {
            this.add_owner(owner);
        }
        this
    }

    /// The raw target. Writes through it are not observed.
    #[must_use]
    pub fn unwrap(&self) -> Object {
        self.inner.target.clone()
    }

    /// Identity comparison of wrappers.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Add an owning binding. Returns `false` if it already was one.
    pub fn add_owner(&self, owner: Id) -> bool {
        self.inner.owners.borrow_mut().insert(owner)
    }

    /// Remove an owning binding. Returns `false` if it was not one.
    pub fn remove_owner(&self, owner: Id) -> bool {
        self.inner.owners.borrow_mut().remove(&owner)
    }

    /// Whether `owner` is in the owner set.
    #[must_use]
    pub fn has_owner(&self, owner: Id) -> bool {
        self.inner.owners.borrow().contains(&owner)
    }

    /// Owner ids in ascending order.
    #[must_use]
    pub fn owners(&self) -> Vec<Id> {
        self.inner.owners.borrow().iter().copied().collect()
    }

    /// Number of owners.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.inner.owners.borrow().len()
    }

    /// Read a property. See [`Object::get`].
    ///
    /// A nested object that already has a live wrapper is returned through
    /// it, so writes made from the parent side still reach the nested
    /// object's owners. Storage stays raw.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        match self.inner.target.get(key) {
            Value::Object(nested) => match nested.wrapper() {
                Some(inner) => Value::Observed(Self { inner }),
                None => Value::Object(nested),
            },
            other => other,
        }
    }

    /// Observed property write.
    ///
    /// Returns `Ok(false)` when the property already held `value`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool, MutationError> {
        let value = unwrap_value(&value.into());
        if self.inner.target.get(key).same_value(&value) {
            return Ok(false);
        }
        self.inner.target.set_raw(key, value.clone())?;
        self.notify(key, &value);
        Ok(true)
    }

    /// Observed in-place mutating call.
    pub fn apply(&self, mutation: Mutation) -> Result<Value, MutationError> {
        let mutation = mutation.unwrap_args();
        let call = mutation.name();
        let outcome = {
            let mut data = self.inner.target.borrow_mut();
            mutation.apply(&mut data)?
        };
        match outcome {
            Outcome::Value(result) => {
                self.notify(call, &result);
                Ok(result)
            }
            Outcome::Receiver => {
                self.notify(call, &Value::Object(self.unwrap()));
                Ok(Value::Observed(self.clone()))
            }
        }
    }

    fn notify(&self, property: &str, value: &Value) {
        // Snapshot: an owner may add or remove owners while handling.
        let owners = self.owners();
        tracing::debug!(
            message = "observed.changed",
            property,
            owners = owners.len(),
        );
        let change = ObjectChange {
            object: self,
            property,
            value,
        };
        for owner in owners {
            match registry::get(owner) {
                Some(subscriber) => subscriber.on_object_changed(&change),
                None => {
                    tracing::trace!(message = "observed.owner_gone", owner = %owner);
                }
            }
        }
    }
}

impl fmt::Debug for ObservedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedObject")
            .field("target", &self.inner.target)
            .field("owners", &self.inner.owners.borrow().len())
            .finish()
    }
}

/// Wrap compound values; other values are returned as-is.
///
/// An already observed value gains `owner` and keeps its identity.
#[must_use]
pub fn wrap_value(value: &Value, owner: Option<Id>) -> Value {
    match value {
        Value::Object(obj) => Value::Observed(ObservedObject::wrap(obj, owner)),
        Value::Observed(obs) => {
            if let Some(owner) = owner {
                obs.add_owner(owner);
            }
            value.clone()
        }
        other => other.clone(),
    }
}

/// Strip the wrapper from an observed value without notifying anyone.
#[must_use]
pub fn unwrap_value(value: &Value) -> Value {
    match value {
        Value::Observed(obs) => Value::Object(obs.unwrap()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Subscriber;
    use std::cell::RefCell;

    struct Owner {
        id: Id,
        seen: RefCell<Vec<(String, Value)>>,
    }

    impl Subscriber for Owner {
        fn subscriber_id(&self) -> Id {
            self.id
        }

        fn on_object_changed(&self, change: &ObjectChange<'_>) {
            self.seen
                .borrow_mut()
                .push((change.property.to_string(), change.value.clone()));
        }
    }

    fn owner() -> Rc<Owner> {
        let o = Rc::new(Owner {
            id: registry::make_id(),
            seen: RefCell::new(Vec::new()),
        });
        let dynamic: Rc<dyn Subscriber> = o.clone();
        registry::add(&dynamic);
        o
    }

    #[test]
    fn wrapping_twice_yields_the_same_wrapper() {
        let raw = Object::record([("a", Value::from(1))]);
        let a = ObservedObject::wrap(&raw, Some(Id::from_raw(1_000_001)));
        let b = ObservedObject::wrap(&raw, Some(Id::from_raw(1_000_002)));
        assert!(a.ptr_eq(&b));
        assert_eq!(a.owner_count(), 2);
        assert!(raw.is_observed());
    }

    #[test]
    fn wrap_value_keeps_observed_identity() {
        let raw = Object::array([]);
        let first = wrap_value(&raw.into(), None);
        let second = wrap_value(&first, Some(Id::from_raw(7)));
        assert!(first.as_observed().unwrap().ptr_eq(second.as_observed().unwrap()));
        assert!(first.as_observed().unwrap().has_owner(Id::from_raw(7)));
    }

    #[test]
    fn property_write_notifies_owner_once() {
        let o = owner();
        let obs = ObservedObject::wrap(&Object::record([("x", Value::from(1))]), Some(o.id));

        assert!(obs.set("x", 2).unwrap());
        assert!(!obs.set("x", 2).unwrap(), "unchanged write is a no-op");
        let seen = o.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "x");
        assert_eq!(seen[0].1.as_number(), Some(2.0));
        registry::delete(o.id);
    }

    #[test]
    fn mutating_call_notifies_with_raw_result() {
        let o = owner();
        let obs = ObservedObject::wrap(&Object::array([Value::from(2), Value::from(1)]), Some(o.id));

        let chained = obs.apply(Mutation::Sort).unwrap();
        assert!(chained.as_observed().unwrap().ptr_eq(&obs));

        let seen = o.seen.borrow();
        assert_eq!(seen[0].0, "sort");
        assert!(matches!(seen[0].1, Value::Object(_)), "payload is unproxied");
        registry::delete(o.id);
    }

    #[test]
    fn stored_values_are_unwrapped() {
        let inner = ObservedObject::wrap(&Object::array([]), None);
        let outer = ObservedObject::wrap(&Object::record::<&str>([]), None);
        outer.set("list", inner.clone()).unwrap();
        assert!(matches!(outer.unwrap().get("list"), Value::Object(_)));
        assert!(outer.get("list").same_value(&Value::from(inner)));
    }

    #[test]
    fn nested_read_goes_through_live_wrapper() {
        let o = owner();
        let row = Object::record([("label", Value::from("a"))]);
        let nested = ObservedObject::wrap(&row, Some(o.id));
        let list = ObservedObject::wrap(&Object::array([Value::from(row.clone())]), None);

        let first = list.get("0");
        assert!(first.as_observed().is_some_and(|w| w.ptr_eq(&nested)));
        first.as_observed().unwrap().set("label", "b").unwrap();
        assert_eq!(o.seen.borrow().len(), 1);

        drop((first, nested));
        assert!(matches!(list.get("0"), Value::Object(_)), "no live wrapper left");
        registry::delete(o.id);
    }

    #[test]
    fn removed_owner_is_not_notified() {
        let o = owner();
        let obs = ObservedObject::wrap(&Object::date(0), Some(o.id));
        assert!(obs.remove_owner(o.id));
        obs.apply(Mutation::SetTime(5)).unwrap();
        assert!(o.seen.borrow().is_empty());
        registry::delete(o.id);
    }

    #[test]
    fn wrapper_is_dropped_with_its_last_handle() {
        let raw = Object::array([]);
        let obs = ObservedObject::wrap(&raw, None);
        drop(obs);
        assert!(!raw.is_observed());
    }
}
