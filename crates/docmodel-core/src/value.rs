//! Dynamic attribute values.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Timelike, Utc};
use rust_decimal::Decimal;

use crate::error::{Error, Result, TypeError};
use crate::model::ModelRef;

/// A dynamically-typed attribute value.
///
/// `Value::Null` is the null sentinel: a value that is known to be empty and
/// serializes as JSON `null`. An attribute that has no value at all is
/// represented by `Option::None` at the API boundary, never by a `Value`.
#[derive(Debug, Clone)]
pub enum Value {
    /// Explicit null
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit floating point
    Float(f64),

    /// Arbitrary precision decimal
    Decimal(Decimal),

    /// Text string
    Text(String),

    /// Calendar date
    Date(NaiveDate),

    /// Timezone-aware timestamp (offset preserved until it goes on the wire)
    DateTime(DateTime<FixedOffset>),

    /// Enumeration member
    Enum(EnumValue),

    /// Untyped JSON mapping
    Map(serde_json::Map<String, serde_json::Value>),

    /// Ordered sequence
    List(Vec<Value>),

    /// Unordered collection without duplicates
    Set(Vec<Value>),

    /// Another model instance
    Model(ModelRef),
}

/// A member of an [`EnumDef`](crate::types::EnumDef).
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub enum_name: Arc<str>,
    pub member: Arc<str>,
    pub raw: Box<Value>,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (Value::Model(a), Value::Model(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Build a set, dropping duplicates while keeping first-seen order.
    pub fn set_of(items: impl IntoIterator<Item = Value>) -> Self {
        let mut out: Vec<Value> = Vec::new();
        for item in items {
            if !out.contains(&item) {
                out.push(item);
            }
        }
        Value::Set(out)
    }

    /// Check if this value is the null sentinel.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Empty string check used for nullable coercion.
    pub fn is_empty_text(&self) -> bool {
        matches!(self, Value::Text(s) if s.is_empty())
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOL",
            Value::Int(_) => "INT",
            Value::Float(_) => "FLOAT",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Date(_) => "DATE",
            Value::DateTime(_) => "DATETIME",
            Value::Enum(_) => "ENUM",
            Value::Map(_) => "MAP",
            Value::List(_) => "LIST",
            Value::Set(_) => "SET",
            Value::Model(_) => "MODEL",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Decimal(d) => d.to_string().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Int(v) => Some(Decimal::from(*v)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Elements of a list or set.
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&ModelRef> {
        match self {
            Value::Model(m) => Some(m),
            _ => None,
        }
    }

    /// Convert a JSON value into a `Value` without any type information.
    ///
    /// Integers that do not fit in `i64` become floats.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    if n.is_u64() {
                        tracing::warn!(
                            value = %n,
                            "integer exceeds i64::MAX; holding it as a float"
                        );
                    }
                    Value::Float(f)
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(map.clone()),
        }
    }

    /// Render this value as JSON.
    ///
    /// Decimals become strings without exponent, timestamps become UTC
    /// ISO-8601 strings, enums become their raw value and sets become lists.
    /// Model instances are not JSON values and are rejected.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    Error::Type(TypeError::new("finite float", format!("{}", f)))
                })?,
            Value::Decimal(d) => serde_json::Value::String(d.to_string()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => serde_json::Value::String(format_utc(dt)),
            Value::Enum(e) => e.raw.to_json()?,
            Value::Map(m) => serde_json::Value::Object(m.clone()),
            Value::List(items) | Value::Set(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<Vec<_>>>()?,
            ),
            Value::Model(_) => {
                return Err(Error::Type(TypeError::new(
                    "JSON-representable value",
                    "model instance",
                )));
            }
        })
    }
}

/// Format a timestamp as ISO-8601 in UTC with a `+00:00` offset.
pub fn format_utc(dt: &DateTime<FixedOffset>) -> String {
    let utc = dt.with_timezone(&Utc);
    if utc.nanosecond() == 0 {
        utc.to_rfc3339_opts(SecondsFormat::Secs, false)
    } else {
        utc.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v.fixed_offset())
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Value::Enum(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Value {
    fn from(v: serde_json::Map<String, serde_json::Value>) -> Self {
        Value::Map(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(&v)
    }
}

impl From<ModelRef> for Value {
    fn from(v: ModelRef) -> Self {
        Value::Model(v)
    }
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError::new(expected, value.type_name()))
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("BOOL", &value))
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(v),
            other => Err(mismatch("INT", &other)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("FLOAT", &value))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("TEXT", &other)),
        }
    }
}

impl TryFrom<Value> for Decimal {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        value.as_decimal().ok_or_else(|| mismatch("DECIMAL", &value))
    }
}
