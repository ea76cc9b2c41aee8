//! Typed value that flows between the indexer, filters and decoded results
//!
//! Raw backend rows are loosely typed JSON. Once a row is coerced against the
//! schema, every field holds one of these values, and filter operands are
//! normalized to the same representation so they can be compared.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A schema-typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    /// Absent optional field
    Null,
    /// Boolean value
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Variant name of a declared enum
    Enum(String),
    /// Ordered array of values
    Array(Vec<Value>),
    /// Nested struct, keyed by field name
    Struct(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Accessors
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 (also converts from unsigned if it fits)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Get as u64 (also converts from non-negative signed)
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Get as f64 (also converts from integers)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// Get as string reference (strings and enum variants)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array reference
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as struct fields reference
    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Get a field from a struct
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_struct().and_then(|fields| fields.get(key))
    }

    /// Short name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Enum(_) => "enum",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }

    /// Compare two values of compatible kinds
    ///
    /// Numbers compare across signed, unsigned and float representations.
    /// Strings and enum variants compare lexicographically. Anything else
    /// only compares equal to an identical value.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::UInt(b)) => Some(compare_signed_unsigned(*a, *b)),
            (Value::UInt(a), Value::Int(b)) => Some(compare_signed_unsigned(*b, *a).reverse()),
            (a, b) if a.is_number() && b.is_number() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) | (Value::Enum(a), Value::Enum(b)) => {
                Some(a.cmp(b))
            }
            (a, b) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_) | Value::Float(_))
    }
}

fn compare_signed_unsigned(signed: i64, unsigned: u64) -> Ordering {
    match u64::try_from(signed) {
        Ok(s) => s.cmp(&unsigned),
        Err(_) => Ordering::Less,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::UInt(u) => serde_json::Value::Number(u.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) | Value::Enum(s) => serde_json::Value::String(s),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Struct(fields) => serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed Extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Error when converting a `Value` into a Rust type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("integer out of range for {0}")]
    IntegerOverflow(&'static str),
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("unknown variant `{0}`")]
    UnknownVariant(String),
    #[error("in field `{field}`: {source}")]
    Field {
        field: String,
        source: Box<ValueError>,
    },
}

impl ValueError {
    fn mismatch(expected: &'static str, value: &Value) -> Self {
        ValueError::TypeMismatch {
            expected,
            actual: value.type_name(),
        }
    }
}

/// Conversion from a decoded `Value` into a Rust type
///
/// Implemented for primitives, `Vec`, `Option`, and generated for structs by
/// `#[derive(Model)]`. Hand-written impls are the way to map enum variants.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, ValueError>;

    /// Value to use when the field is absent from a record
    fn from_missing() -> Option<Self> {
        None
    }
}

/// Extract one named field of a record
pub fn field_from<T: FromValue>(
    fields: &BTreeMap<String, Value>,
    name: &str,
) -> Result<T, ValueError> {
    match fields.get(name) {
        Some(value) => T::from_value(value).map_err(|e| ValueError::Field {
            field: name.to_string(),
            source: Box::new(e),
        }),
        None => T::from_missing().ok_or_else(|| ValueError::MissingField(name.to_string())),
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value.as_bool().ok_or_else(|| ValueError::mismatch("bool", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ValueError::mismatch("string", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value.as_f64().ok_or_else(|| ValueError::mismatch("float", value))
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value
            .as_f64()
            .map(|f| f as f32)
            .ok_or_else(|| ValueError::mismatch("float", value))
    }
}

macro_rules! signed_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, ValueError> {
                    let i = value.as_i64().ok_or_else(|| ValueError::mismatch("int", value))?;
                    <$ty>::try_from(i).map_err(|_| ValueError::IntegerOverflow(stringify!($ty)))
                }
            }
        )*
    };
}

macro_rules! unsigned_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, ValueError> {
                    let u = value.as_u64().ok_or_else(|| ValueError::mismatch("uint", value))?;
                    <$ty>::try_from(u).map_err(|_| ValueError::IntegerOverflow(stringify!($ty)))
                }
            }
        )*
    };
}

signed_from_value!(i8, i16, i32, i64);
unsigned_from_value!(u8, u16, u32, u64);

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value
            .as_array()
            .ok_or_else(|| ValueError::mismatch("array", value))?
            .iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn from_missing() -> Option<Self> {
        Some(None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
