//! Self-describing value tree exchanged between the record adapter and the
//! writer / reader.

use crate::format::Family;

/// Ordered key/value pairs.  Order is preserved on the wire; keys are not
/// deduplicated by the codec.
pub type ValueMap = Vec<(Value, Value)>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float32(f32),
    Float64(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    /// The wire family this value encodes as.
    pub fn family(&self) -> Family {
        match self {
            Value::Nil        => Family::Nil,
            Value::Bool(_)    => Family::Bool,
            Value::UInt(_)    => Family::UInt,
            Value::Int(_)     => Family::Int,
            Value::Float32(_) => Family::Float32,
            Value::Float64(_) => Family::Float64,
            Value::Str(_)     => Family::Str,
            Value::Bin(_)     => Family::Bin,
            Value::Array(_)   => Family::Array,
            Value::Map(_)     => Family::Map,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.family().name()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view, regardless of which integer variant carries it.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i)  => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Int(i)  => Some(*i),
            _ => None,
        }
    }

    /// Float view; float32 is widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(f) => Some(f64::from(*f)),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up the first pair whose key is the string `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

macro_rules! from_unsigned {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self { Value::UInt(u64::from(v)) }
        }
    )*};
}

// Non-negative signed inputs normalize to `UInt`, so a value decoded from
// the wire compares equal to the one it was built from.
macro_rules! from_signed {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                let v = i64::from(v);
                if v < 0 { Value::Int(v) } else { Value::UInt(v as u64) }
            }
        }
    )*};
}

from_unsigned!(u8, u16, u32, u64);
from_signed!(i8, i16, i32, i64);

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self { Value::Float32(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float64(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::Str(v.to_owned()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::Str(v) }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bin(v) }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self { Value::Array(v) }
}

impl From<ValueMap> for Value {
    fn from(v: ValueMap) -> Self { Value::Map(v) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_non_negative_normalizes_to_uint() {
        assert_eq!(Value::from(5i32), Value::UInt(5));
        assert_eq!(Value::from(-5i32), Value::Int(-5));
    }

    #[test]
    fn map_lookup_by_string_key() {
        let m = Value::Map(vec![
            (Value::from("i"), Value::from("abc")),
            (Value::UInt(1), Value::Bool(true)),
        ]);
        assert_eq!(m.get("i"), Some(&Value::from("abc")));
        assert_eq!(m.get("missing"), None);
        assert_eq!(Value::Nil.get("i"), None);
    }

    #[test]
    fn option_maps_to_nil() {
        assert_eq!(Value::from(None::<u32>), Value::Nil);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }
}
