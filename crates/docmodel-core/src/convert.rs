//! Value converters.
//!
//! A converter translates a value between its wire form (what goes into a
//! document) and its model form (what an attribute holds). Fields of the
//! scalar kinds get one from [`DefaultConverters`] unless they declare their
//! own.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::error::{Error, Result, TypeError};
use crate::field::FieldInfo;
use crate::types::{BasicKind, FieldKind};
use crate::value::{Value, format_utc};

/// Which way a value is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Model value to document value
    ToWire,
    /// Document value to model value
    FromWire,
    /// Arbitrary value assigned to an attribute
    ToModel,
}

impl Direction {
    /// Both directions that end with a model value.
    pub const fn is_inbound(self) -> bool {
        matches!(self, Direction::FromWire | Direction::ToModel)
    }
}

/// Converts a value for a field in a given direction.
///
/// Implementations must pass `Value::Null` through unchanged.
pub trait Converter: Send + Sync {
    fn convert(&self, direction: Direction, field: &FieldInfo, value: Value) -> Result<Value>;
}

impl<F> Converter for F
where
    F: Fn(Direction, &FieldInfo, Value) -> Result<Value> + Send + Sync,
{
    fn convert(&self, direction: Direction, field: &FieldInfo, value: Value) -> Result<Value> {
        self(direction, field, value)
    }
}

/// A nullable field receiving a blank primitive from the wire stores null.
fn blank_to_null(direction: Direction, field: &FieldInfo, value: &Value) -> bool {
    direction == Direction::FromWire
        && field.nullable
        && matches!(value, Value::Text(s) if s.trim().is_empty())
}

fn type_error(expected: &str, field: &FieldInfo, value: &Value) -> Error {
    Error::Type(TypeError::new(expected, format!("{:?}", value)).field(&field.name))
}

/// Render a float the way a document expects to read it back.
pub(crate) fn float_to_string(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Converter for str, int, float, bool and UUID kinds. Lists are converted
/// element by element.
#[derive(Debug, Clone, Copy)]
pub struct BasicConverter {
    kind: BasicKind,
}

impl BasicConverter {
    pub const fn new(kind: BasicKind) -> Self {
        Self { kind }
    }

    fn convert_one(&self, field: &FieldInfo, value: Value) -> Result<Value> {
        match self.kind {
            BasicKind::Str | BasicKind::Uuid => to_text(field, value),
            BasicKind::Int => to_int(field, value),
            BasicKind::Float => to_float(field, value),
            BasicKind::Bool => to_bool(field, value),
            other => Err(Error::Custom(format!(
                "BasicConverter does not handle {:?}",
                other
            ))),
        }
    }
}

impl Converter for BasicConverter {
    fn convert(&self, direction: Direction, field: &FieldInfo, value: Value) -> Result<Value> {
        if value.is_null() || (self.kind != BasicKind::Str && blank_to_null(direction, field, &value)) {
            return Ok(Value::Null);
        }
        match value {
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|item| self.convert_one(field, item))
                    .collect::<Result<_>>()?,
            )),
            other => self.convert_one(field, other),
        }
    }
}

fn to_text(field: &FieldInfo, value: Value) -> Result<Value> {
    Ok(Value::Text(match value {
        Value::Text(s) => s,
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_to_string(f),
        Value::Bool(b) => b.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => format_utc(&dt),
        Value::Enum(e) => return to_text(field, *e.raw),
        other => return Err(type_error("str", field, &other)),
    }))
}

fn to_int(field: &FieldInfo, value: Value) -> Result<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Decimal(d) => d
            .trunc()
            .to_string()
            .parse()
            .map(Value::Int)
            .map_err(|_| type_error("int", field, &Value::Decimal(d))),
        Value::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(Value::Int(0));
            }
            trimmed
                .parse()
                .map(Value::Int)
                .map_err(|_| type_error("int", field, &Value::Text(s)))
        }
        other => Err(type_error("int", field, &other)),
    }
}

fn to_float(field: &FieldInfo, value: Value) -> Result<Value> {
    match value {
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Bool(b) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        ref v @ Value::Decimal(_) => v
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| type_error("float", field, v)),
        Value::Text(s) => s
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| type_error("float", field, &Value::Text(s))),
        other => Err(type_error("float", field, &other)),
    }
}

/// Parse common truthy and falsy spellings.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" | "" => Some(false),
        _ => None,
    }
}

fn to_bool(field: &FieldInfo, value: Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Int(i) => Ok(Value::Bool(i != 0)),
        Value::Float(f) => Ok(Value::Bool(f != 0.0)),
        Value::Text(s) => parse_bool(&s)
            .map(Value::Bool)
            .ok_or_else(|| type_error("bool", field, &Value::Text(s))),
        other => Err(type_error("bool", field, &other)),
    }
}

/// Decimal values travel as strings without exponent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecimalConverter;

impl DecimalConverter {
    fn parse(field: &FieldInfo, value: Value) -> Result<Decimal> {
        match value {
            Value::Decimal(d) => Ok(d),
            Value::Int(i) => Ok(Decimal::from(i)),
            // Go through the short string form so 1.03 stays 1.03.
            Value::Float(f) => parse_decimal(&float_to_string(f))
                .ok_or_else(|| type_error("Decimal", field, &Value::Float(f))),
            Value::Text(s) => {
                parse_decimal(s.trim()).ok_or_else(|| type_error("Decimal", field, &Value::Text(s)))
            }
            other => Err(type_error("Decimal", field, &other)),
        }
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

impl Converter for DecimalConverter {
    fn convert(&self, direction: Direction, field: &FieldInfo, value: Value) -> Result<Value> {
        if value.is_null() || blank_to_null(direction, field, &value) {
            return Ok(Value::Null);
        }
        let decimal = Self::parse(field, value)?;
        if direction.is_inbound() {
            Ok(Value::Decimal(decimal))
        } else {
            Ok(Value::Text(decimal.to_string()))
        }
    }
}

/// Calendar dates travel as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateConverter;

impl DateConverter {
    fn parse(field: &FieldInfo, value: Value) -> Result<NaiveDate> {
        match value {
            Value::Date(d) => Ok(d),
            Value::DateTime(dt) => Ok(dt.date_naive()),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .or_else(|_| parse_datetime(&s).map(|dt| dt.date_naive()).ok_or(()))
                .map_err(|_| type_error("date", field, &Value::Text(s))),
            other => Err(type_error("date", field, &other)),
        }
    }
}

impl Converter for DateConverter {
    fn convert(&self, direction: Direction, field: &FieldInfo, value: Value) -> Result<Value> {
        if value.is_null() || blank_to_null(direction, field, &value) {
            return Ok(Value::Null);
        }
        let date = Self::parse(field, value)?;
        if direction.is_inbound() {
            Ok(Value::Date(date))
        } else {
            Ok(Value::Text(date.format("%Y-%m-%d").to_string()))
        }
    }
}

/// Parse an ISO-8601 timestamp.
///
/// Offsets are kept. Timestamps without an offset are taken as UTC, and a
/// bare date is UTC midnight.
pub fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(date.and_time(NaiveTime::MIN).and_utc().fixed_offset())
}

/// Timestamps travel as ISO-8601 in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeConverter;

impl DateTimeConverter {
    fn parse(field: &FieldInfo, value: Value) -> Result<DateTime<FixedOffset>> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            Value::Date(d) => Ok(d.and_time(NaiveTime::MIN).and_utc().fixed_offset()),
            Value::Text(s) => {
                parse_datetime(&s).ok_or_else(|| type_error("datetime", field, &Value::Text(s)))
            }
            other => Err(type_error("datetime", field, &other)),
        }
    }
}

impl Converter for DateTimeConverter {
    fn convert(&self, direction: Direction, field: &FieldInfo, value: Value) -> Result<Value> {
        if value.is_null() || blank_to_null(direction, field, &value) {
            return Ok(Value::Null);
        }
        if direction == Direction::ToWire && value.as_str().is_some_and(|s| s.trim().is_empty()) {
            return Ok(Value::Null);
        }
        let dt = Self::parse(field, value)?;
        if direction.is_inbound() {
            Ok(Value::DateTime(dt))
        } else {
            Ok(Value::Text(format_utc(&dt)))
        }
    }
}

/// Enum members travel as their raw value. Inbound accepts the member itself
/// or its raw value.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumConverter;

impl Converter for EnumConverter {
    fn convert(&self, direction: Direction, field: &FieldInfo, value: Value) -> Result<Value> {
        if value.is_null() || blank_to_null(direction, field, &value) {
            return Ok(Value::Null);
        }
        let FieldKind::Enum(def) = &field.type_hint else {
            return Err(type_error("enum field", field, &value));
        };
        let member = match value {
            Value::Enum(e) if e.enum_name == def.name => e,
            Value::Enum(e) => {
                return Err(type_error(&def.name, field, &Value::Enum(e)));
            }
            raw => def
                .by_raw(&raw)
                .ok_or_else(|| type_error(&def.name, field, &raw))?,
        };
        if direction.is_inbound() {
            Ok(Value::Enum(member))
        } else {
            Ok(*member.raw)
        }
    }
}

/// The converter used for each scalar kind when a field declares none.
#[derive(Clone)]
pub struct DefaultConverters {
    by_kind: HashMap<BasicKind, Arc<dyn Converter>>,
}

impl DefaultConverters {
    /// No defaults at all.
    pub fn empty() -> Self {
        Self {
            by_kind: HashMap::new(),
        }
    }

    /// The built-in set covering every [`BasicKind`].
    pub fn standard() -> Self {
        let mut converters = Self::empty();
        for kind in [
            BasicKind::Str,
            BasicKind::Int,
            BasicKind::Float,
            BasicKind::Bool,
            BasicKind::Uuid,
        ] {
            converters.register(kind, BasicConverter::new(kind));
        }
        converters.register(BasicKind::Decimal, DecimalConverter);
        converters.register(BasicKind::Date, DateConverter);
        converters.register(BasicKind::DateTime, DateTimeConverter);
        converters
    }

    /// Replace the default converter for `kind`.
    pub fn register(&mut self, kind: BasicKind, converter: impl Converter + 'static) {
        self.by_kind.insert(kind, Arc::new(converter));
    }

    pub fn get(&self, kind: BasicKind) -> Option<Arc<dyn Converter>> {
        self.by_kind.get(&kind).cloned()
    }

    /// Default converter for a field kind, if it is a scalar kind.
    pub fn for_kind(&self, kind: &FieldKind) -> Option<Arc<dyn Converter>> {
        kind.basic_kind().and_then(|basic| self.get(basic))
    }
}

impl Default for DefaultConverters {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for DefaultConverters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.by_kind.keys().collect();
        kinds.sort();
        f.debug_struct("DefaultConverters")
            .field("kinds", &kinds)
            .finish()
    }
}
