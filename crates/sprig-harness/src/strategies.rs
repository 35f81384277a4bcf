//! `proptest` strategies for [`Value`]s.

use proptest::prelude::*;
use sprig_core::{Object, Value};

/// Any primitive value, NaN included.
pub fn primitive() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Undefined),
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1.0e6f64..1.0e6).prop_map(Value::Number),
        Just(Value::Number(f64::NAN)),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

/// Primitives a store accepts (no null or undefined).
pub fn storable_primitive() -> impl Strategy<Value = Value> {
    primitive().prop_filter("store refuses nullish values", |v| !v.is_nullish())
}

/// Acyclic compound values up to a small depth.
pub fn compound() -> impl Strategy<Value = Value> {
    let leaf = primitive();
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4)
                .prop_map(|items| Value::from(Object::array(items))),
            proptest::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|fields| Value::from(Object::record(fields))),
            any::<i32>().prop_map(|ms| Value::from(Object::date(i64::from(ms)))),
        ]
    })
    .prop_filter("compound at the top", Value::is_compound)
}

/// Either kind.
pub fn value() -> impl Strategy<Value = Value> {
    prop_oneof![primitive(), compound()]
}
