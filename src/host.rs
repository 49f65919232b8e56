//! Boundary between loosely-typed host data and the wire value tree.
//!
//! Push payloads arrive as JSON.  This is the only module that inspects
//! dynamic JSON types; everything downstream works on [`Value`].

use serde_json::{Map, Number, Value as Json};

use crate::value::{Value, ValueMap};
use crate::writer::EncodeError;

/// Classify a host value into a wire value.
///
/// Integers keep their exact value (`UInt` for non-negative, `Int` for
/// negative); every other number becomes `Float64`.  Object keys become
/// `Str` keys in the object's iteration order.
pub fn classify(v: &Json) -> Result<Value, EncodeError> {
    Ok(match v {
        Json::Null      => Value::Nil,
        Json::Bool(b)   => Value::Bool(*b),
        Json::Number(n) => classify_number(n)?,
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::Array(
            items.iter().map(classify).collect::<Result<_, _>>()?,
        ),
        Json::Object(obj) => Value::Map(classify_object(obj)?),
    })
}

/// Classify a host object into map pairs.
pub fn classify_object(obj: &Map<String, Json>) -> Result<ValueMap, EncodeError> {
    obj.iter()
        .map(|(k, v)| Ok((Value::Str(k.clone()), classify(v)?)))
        .collect()
}

fn classify_number(n: &Number) -> Result<Value, EncodeError> {
    if let Some(u) = n.as_u64() {
        Ok(Value::UInt(u))
    } else if let Some(i) = n.as_i64() {
        Ok(Value::Int(i))
    } else if let Some(f) = n.as_f64() {
        Ok(Value::Float64(f))
    } else {
        Err(EncodeError::Unrepresentable(format!("number {n}")))
    }
}

/// Render a decoded value as JSON for display.
///
/// Lossy where JSON has no counterpart: blobs become lowercase hex strings,
/// non-finite floats become `null`, and non-string map keys are rendered
/// through their JSON text.
pub fn to_json(v: &Value) -> Json {
    match v {
        Value::Nil        => Json::Null,
        Value::Bool(b)    => Json::Bool(*b),
        Value::UInt(u)    => Json::from(*u),
        Value::Int(i)     => Json::from(*i),
        Value::Float32(f) => float_json(f64::from(*f)),
        Value::Float64(f) => float_json(*f),
        Value::Str(s)     => Json::String(s.clone()),
        Value::Bin(b)     => Json::String(hex::encode(b)),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(pairs) => Json::Object(map_to_json(pairs)),
    }
}

pub fn map_to_json(pairs: &ValueMap) -> Map<String, Json> {
    pairs
        .iter()
        .map(|(k, v)| {
            let key = match k {
                Value::Str(s) => s.clone(),
                other => to_json(other).to_string(),
            };
            (key, to_json(v))
        })
        .collect()
}

fn float_json(f: f64) -> Json {
    Number::from_f64(f).map_or(Json::Null, Json::Number)
}
