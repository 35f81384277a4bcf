#![forbid(unsafe_code)]

//! JSON encoding of persisted values.
//!
//! Scalars and plain records/arrays map onto JSON directly. Everything else
//! uses a single-key tagged object:
//!
//! | Value | JSON |
//! |-------|------|
//! | `Undefined` | `{"@undefined": true}` |
//! | date | `{"@date": <ms>}` |
//! | map | `{"@map": [[k, v], ...]}` |
//! | set | `{"@set": [...]}` |
//! | classed record | `{"@class": "Name", "fields": {...}}` |
//!
//! Functions, non-finite numbers and cyclic data cannot be encoded.

use ahash::AHashSet;
use serde_json::{Map, Number, Value as Json, json};
use sprig_core::{Compound, Object, Value};

/// Why a value could not be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    Function,
    NonFinite,
    Cycle,
}

pub fn encode(value: &Value) -> Result<Json, EncodeError> {
    encode_inner(value, &mut AHashSet::new())
}

fn encode_inner(value: &Value, visiting: &mut AHashSet<usize>) -> Result<Json, EncodeError> {
    match value {
        Value::Undefined => Ok(json!({ "@undefined": true })),
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Number(n) => Number::from_f64(*n)
            .map(Json::Number)
            .ok_or(EncodeError::NonFinite),
        Value::Str(s) => Ok(Json::String(s.to_string())),
        Value::Function(_) => Err(EncodeError::Function),
        Value::Object(_) | Value::Observed(_) => {
            let Some(obj) = value.as_object() else {
                return Err(EncodeError::Function);
            };
            let addr = obj.addr();
            if !visiting.insert(addr) {
                return Err(EncodeError::Cycle);
            }
            let encoded = encode_compound(&obj, visiting);
            visiting.remove(&addr);
            encoded
        }
    }
}

fn encode_compound(obj: &Object, visiting: &mut AHashSet<usize>) -> Result<Json, EncodeError> {
    let data = obj.borrow();
    Ok(match &*data {
        Compound::Record { class, fields } => {
            let mut map = Map::new();
            for (k, v) in fields {
                map.insert(k.clone(), encode_inner(v, visiting)?);
            }
            match class {
                Some(class) => json!({ "@class": class.as_ref(), "fields": map }),
                None => Json::Object(map),
            }
        }
        Compound::Array(items) => Json::Array(
            items
                .iter()
                .map(|v| encode_inner(v, visiting))
                .collect::<Result<_, _>>()?,
        ),
        Compound::Date(ms) => json!({ "@date": ms }),
        Compound::Map(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                pairs.push(json!([encode_inner(k, visiting)?, encode_inner(v, visiting)?]));
            }
            json!({ "@map": pairs })
        }
        Compound::Set(items) => {
            let items: Vec<Json> = items
                .iter()
                .map(|v| encode_inner(v, visiting))
                .collect::<Result<_, _>>()?;
            json!({ "@set": items })
        }
    })
}

/// Decode a document produced by [`encode`]. Unknown shapes decode as
/// plain records.
#[must_use]
pub fn decode(doc: &Json) -> Value {
    match doc {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::str(s.as_str()),
        Json::Array(items) => Value::Object(Object::array(items.iter().map(decode))),
        Json::Object(map) => decode_object(map),
    }
}

fn decode_object(map: &Map<String, Json>) -> Value {
    if map.len() == 1 {
        if map.get("@undefined").is_some() {
            return Value::Undefined;
        }
        if let Some(ms) = map.get("@date").and_then(Json::as_i64) {
            return Value::Object(Object::date(ms));
        }
        if let Some(pairs) = map.get("@map").and_then(Json::as_array) {
            let entries = pairs.iter().filter_map(|pair| match pair.as_array()?.as_slice() {
                [k, v] => Some((decode(k), decode(v))),
                _ => None,
            });
            return Value::Object(Object::map(entries));
        }
        if let Some(items) = map.get("@set").and_then(Json::as_array) {
            return Value::Object(Object::set(items.iter().map(decode)));
        }
    }
    if map.len() == 2
        && let (Some(class), Some(Json::Object(fields))) =
            (map.get("@class").and_then(Json::as_str), map.get("fields"))
    {
        return Value::Object(Object::instance(
            class,
            fields.iter().map(|(k, v)| (k.clone(), decode(v))),
        ));
    }
    Value::Object(Object::record(
        map.iter().map(|(k, v)| (k.clone(), decode(v))),
    ))
}
