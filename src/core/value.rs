//! # Values
//!
//! The tagged value type every stored setting, manifest default and exported leaf is
//! expressed in, the declared `ValueType` tags it is checked against, and the bridge to
//! `plist::Value` used for every document that touches disk.
//!
//! Key paths address nested values: segments are separated by `.` and a segment ending
//! in `[]` descends into an array at the caller-supplied array index
//! (e.g. `Servers[].Host`).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// A single setting value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(into = "plist::Value", try_from = "plist::Value")]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// A declared value type, as written in a manifest (`pfm_type` / `pfm_type_input`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Real,
    Boolean,
    Date,
    Data,
    Array,
    Dictionary,
}

impl ValueType {
    /// The value exported for an enabled key that holds nothing.
    /// Dates have no meaningful empty value.
    pub fn empty_value(&self) -> Option<Value> {
        match self {
            Self::String => Some(Value::Str(String::new())),
            Self::Integer => Some(Value::Int(0)),
            Self::Real => Some(Value::Float(0.0)),
            Self::Boolean => Some(Value::Bool(false)),
            Self::Date => None,
            Self::Data => Some(Value::Bytes(Vec::new())),
            Self::Array => Some(Value::List(Vec::new())),
            Self::Dictionary => Some(Value::Map(BTreeMap::new())),
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Array | Self::Dictionary)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Data => "data",
            Self::Array => "array",
            Self::Dictionary => "dictionary",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(Self::String),
            "integer" | "int" => Ok(Self::Integer),
            "real" | "float" => Ok(Self::Real),
            "boolean" | "bool" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            "data" => Ok(Self::Data),
            "array" => Ok(Self::Array),
            "dictionary" | "dict" => Ok(Self::Dictionary),
            other => Err(format!("unknown value type '{}'", other)),
        }
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Str(_) => ValueType::String,
            Self::Int(_) => ValueType::Integer,
            Self::Float(_) => ValueType::Real,
            Self::Bool(_) => ValueType::Boolean,
            Self::Date(_) => ValueType::Date,
            Self::Bytes(_) => ValueType::Data,
            Self::List(_) => ValueType::Array,
            Self::Map(_) => ValueType::Dictionary,
        }
    }

    /// Empty strings, data, arrays and dictionaries count as "no value".
    /// Numbers, booleans and dates are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Str(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view used by range checks; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Equality that treats `Int(1)` and `Float(1.0)` as the same number.
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }

    /// Whether the value matches the declared type, allowing integers where reals are declared.
    pub fn conforms_to(&self, declared: ValueType) -> bool {
        let actual = self.value_type();
        actual == declared || (declared == ValueType::Real && actual == ValueType::Integer)
    }

    /// Converts the value into the declared type when that is lossless. Used when a value
    /// arrives from a loosely typed source (a command line, a JSON manifest default).
    pub fn coerce_to(self, declared: ValueType) -> Result<Self, Self> {
        match (self, declared) {
            (Self::Int(i), ValueType::Real) => Ok(Self::Float(i as f64)),
            (Self::Float(f), ValueType::Integer) => match float_to_int(f) {
                Some(i) => Ok(Self::Int(i)),
                None => Err(Self::Float(f)),
            },
            (v, t) if v.value_type() == t => Ok(v),
            (v, _) => Err(v),
        }
    }

    /// Parses a textual value as the given type (command-line input).
    pub fn parse_as(kind: ValueType, text: &str) -> Result<Self, String> {
        match kind {
            ValueType::String => Ok(Self::Str(text.to_string())),
            ValueType::Integer => text
                .trim()
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|e| format!("'{}' is not an integer: {}", text, e)),
            ValueType::Real => text
                .trim()
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|e| format!("'{}' is not a number: {}", text, e)),
            ValueType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Self::Bool(true)),
                "false" | "no" | "0" => Ok(Self::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", text)),
            },
            ValueType::Date => DateTime::parse_from_rfc3339(text.trim())
                .map(|d| Self::Date(d.with_timezone(&Utc)))
                .map_err(|e| format!("'{}' is not an RFC 3339 date: {}", text, e)),
            ValueType::Data => hex::decode(text.trim())
                .map(Self::Bytes)
                .map_err(|e| format!("'{}' is not hexadecimal data: {}", text, e)),
            ValueType::Array | ValueType::Dictionary => {
                let json: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| format!("'{}' is not valid JSON: {}", text, e))?;
                let value = Self::from_json(json);
                if value.value_type() == kind {
                    Ok(value)
                } else {
                    Err(format!("'{}' is not a JSON {}", text, kind))
                }
            }
        }
    }

    /// Best-effort conversion from JSON. `null` becomes an empty string.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Str(String::new()),
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Self::Bytes(b) => serde_json::Value::String(hex::encode(b)),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    // ---MARK: Key path access ---

    /// Looks up a nested value. Returns `None` when any segment is missing, when a
    /// segment crosses a non-dictionary, or when an array segment is reached without an
    /// array index.
    pub fn get_path(&self, path: &str, array_index: Option<usize>) -> Option<&Self> {
        let mut current = self;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let (name, is_array) = split_segment(segment);
            current = current.as_map()?.get(name)?;
            if is_array {
                current = current.as_list()?.get(array_index?)?;
            }
        }
        Some(current)
    }

    /// Stores a nested value, creating intermediate dictionaries as needed. An array
    /// segment may only address an existing element or append at `len`.
    /// Returns `false` when the path cannot be materialized.
    pub fn set_path(&mut self, path: &str, array_index: Option<usize>, value: Self) -> bool {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        set_segments(self, &segments, array_index, value)
    }

    /// Removes a nested value, returning it.
    pub fn remove_path(&mut self, path: &str, array_index: Option<usize>) -> Option<Self> {
        let (parent_path, last) = match path.rsplit_once('.') {
            Some((parent, last)) => (Some(parent), last),
            None => (None, path),
        };
        let (name, is_array) = split_segment(last);
        let parent = match parent_path {
            Some(p) => get_path_mut(self, p, array_index)?,
            None => self,
        };
        let map = parent.as_map_mut()?;
        if is_array {
            let Self::List(items) = map.get_mut(name)? else {
                return None;
            };
            let index = array_index?;
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        } else {
            map.remove(name)
        }
    }
}

/// Splits `Name[]` into (`Name`, true).
pub(crate) fn split_segment(segment: &str) -> (&str, bool) {
    match segment.strip_suffix("[]") {
        Some(name) => (name, true),
        None => (segment, false),
    }
}

fn get_path_mut<'a>(
    root: &'a mut Value,
    path: &str,
    array_index: Option<usize>,
) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (name, is_array) = split_segment(segment);
        current = current.as_map_mut()?.get_mut(name)?;
        if is_array {
            let Value::List(items) = current else {
                return None;
            };
            current = items.get_mut(array_index?)?;
        }
    }
    Some(current)
}

fn set_segments(
    current: &mut Value,
    segments: &[&str],
    array_index: Option<usize>,
    value: Value,
) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        *current = value;
        return true;
    };
    let (name, is_array) = split_segment(first);
    let Value::Map(map) = current else {
        return false;
    };

    if !is_array {
        if rest.is_empty() {
            map.insert(name.to_string(), value);
            return true;
        }
        let child = map
            .entry(name.to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if !matches!(child, Value::Map(_)) {
            *child = Value::Map(BTreeMap::new());
        }
        return set_segments(child, rest, array_index, value);
    }

    let Some(index) = array_index else {
        return false;
    };
    let list = map
        .entry(name.to_string())
        .or_insert_with(|| Value::List(Vec::new()));
    let Value::List(items) = list else {
        return false;
    };
    if index > items.len() {
        return false;
    }
    if index == items.len() {
        items.push(Value::Map(BTreeMap::new()));
    }
    match items.get_mut(index) {
        Some(item) => set_segments(item, rest, array_index, value),
        None => false,
    }
}

/// 2^63, the first float past `i64::MAX`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// A whole float that fits an `i64`. Fractions, NaN and out-of-range values give `None`.
#[allow(clippy::cast_possible_truncation)]
fn float_to_int(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&f)).then(|| f as i64)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "\"{}\"", s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::Bytes(b) => write!(f, "<{}>", hex::encode(b)),
            Self::List(_) | Self::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

// --- plist bridge ---

/// A plist node with no counterpart in `Value` (e.g. a keyed-archiver UID).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedPlistValue(pub String);

impl fmt::Display for UnsupportedPlistValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported property list value: {}", self.0)
    }
}

impl std::error::Error for UnsupportedPlistValue {}

impl From<Value> for plist::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Str(s) => Self::String(s),
            Value::Int(i) => Self::Integer(i.into()),
            Value::Float(f) => Self::Real(f),
            Value::Bool(b) => Self::Boolean(b),
            Value::Date(d) => Self::Date(plist::Date::from(SystemTime::from(d))),
            Value::Bytes(b) => Self::Data(b),
            Value::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Map(map) => Self::Dictionary(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect::<plist::Dictionary>(),
            ),
        }
    }
}

impl TryFrom<plist::Value> for Value {
    type Error = UnsupportedPlistValue;

    fn try_from(value: plist::Value) -> Result<Self, Self::Error> {
        Ok(match value {
            plist::Value::String(s) => Self::Str(s),
            plist::Value::Integer(i) => match i.as_signed() {
                Some(v) => Self::Int(v),
                None => return Err(UnsupportedPlistValue(format!("integer {} out of range", i))),
            },
            plist::Value::Real(f) => Self::Float(f),
            plist::Value::Boolean(b) => Self::Bool(b),
            plist::Value::Date(d) => Self::Date(DateTime::<Utc>::from(SystemTime::from(d))),
            plist::Value::Data(b) => Self::Bytes(b),
            plist::Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            plist::Value::Dictionary(dict) => Self::Map(
                dict.into_iter()
                    .map(|(k, v)| Self::try_from(v).map(|v| (k, v)))
                    .collect::<Result<BTreeMap<_, _>, _>>()?,
            ),
            other => return Err(UnsupportedPlistValue(format!("{:?}", other))),
        })
    }
}

/// Builds a `Value::Map` from key/value pairs. Test and fixture convenience.
pub fn map_of<I, K>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
}
