//! # Value Processors
//!
//! A value processor converts between the type a key is *edited* as (its input type) and
//! the type it is *stored and exported* as (its declared type). `forward` goes from the
//! edited form to the stored form, `inverse` goes back for display.
//!
//! Processors are looked up by the name given in the manifest (`pfm_value_processor`)
//! or, when none is named, by the (input type, declared type) pair.

use crate::core::manifest::Subkey;
use crate::core::value::{Value, ValueType};
use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use std::collections::HashMap;

pub trait ValueProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    /// Edited form to stored form. `None` when the input cannot be converted.
    fn forward(&self, value: &Value) -> Option<Value>;
    /// Stored form to edited form.
    fn inverse(&self, value: &Value) -> Option<Value>;
}

struct DateString;

impl ValueProcessor for DateString {
    fn name(&self) -> &'static str {
        "date-string"
    }

    fn forward(&self, value: &Value) -> Option<Value> {
        let text = value.as_str()?;
        DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|d| Value::Date(d.with_timezone(&Utc)))
    }

    fn inverse(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Date(d) => Some(Value::Str(d.to_rfc3339_opts(SecondsFormat::Secs, true))),
            _ => None,
        }
    }
}

struct HexData;

impl ValueProcessor for HexData {
    fn name(&self) -> &'static str {
        "hex"
    }

    fn forward(&self, value: &Value) -> Option<Value> {
        let text: String = value.as_str()?.split_whitespace().collect();
        hex::decode(text).ok().map(Value::Bytes)
    }

    fn inverse(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Bytes(b) => Some(Value::Str(hex::encode(b))),
            _ => None,
        }
    }
}

struct CommaList;

impl ValueProcessor for CommaList {
    fn name(&self) -> &'static str {
        "comma-list"
    }

    fn forward(&self, value: &Value) -> Option<Value> {
        let items = value
            .as_str()?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::Str(s.to_string()))
            .collect();
        Some(Value::List(items))
    }

    fn inverse(&self, value: &Value) -> Option<Value> {
        let parts: Option<Vec<&str>> = value.as_list()?.iter().map(Value::as_str).collect();
        Some(Value::Str(parts?.join(", ")))
    }
}

struct IntegerString;

impl ValueProcessor for IntegerString {
    fn name(&self) -> &'static str {
        "int-string"
    }

    fn forward(&self, value: &Value) -> Option<Value> {
        value.as_str()?.trim().parse::<i64>().ok().map(Value::Int)
    }

    fn inverse(&self, value: &Value) -> Option<Value> {
        value.as_i64().map(|i| Value::Str(i.to_string()))
    }
}

lazy_static! {
    static ref PROCESSORS: HashMap<&'static str, Box<dyn ValueProcessor>> = {
        let all: Vec<Box<dyn ValueProcessor>> = vec![
            Box::new(DateString),
            Box::new(HexData),
            Box::new(CommaList),
            Box::new(IntegerString),
        ];
        all.into_iter().map(|p| (p.name(), p)).collect()
    };
}

/// Finds a processor by its registered name.
pub fn lookup(name: &str) -> Option<&'static dyn ValueProcessor> {
    PROCESSORS.get(name).map(|p| p.as_ref())
}

/// The processor that applies to a subkey, if its input type differs from its declared type.
pub fn for_subkey(subkey: &Subkey) -> Option<&'static dyn ValueProcessor> {
    if subkey.value_input_type == subkey.value_type {
        return None;
    }
    if let Some(name) = &subkey.value_processor {
        let found = lookup(name);
        if found.is_none() {
            log::warn!(
                "Unknown value processor '{}' on '{}' in '{}'.",
                name,
                subkey.key_path,
                subkey.domain
            );
        }
        return found;
    }
    let implicit = match (subkey.value_input_type, subkey.value_type) {
        (ValueType::String, ValueType::Date) => "date-string",
        (ValueType::String, ValueType::Data) => "hex",
        (ValueType::String, ValueType::Array) => "comma-list",
        (ValueType::String, ValueType::Integer) => "int-string",
        _ => return None,
    };
    lookup(implicit)
}

/// Converts an edited value into its stored form. Values already in the declared type,
/// and values a processor refuses, are returned unchanged.
pub fn to_stored(subkey: &Subkey, value: Value) -> Value {
    if value.value_type() != subkey.value_input_type {
        return value;
    }
    match for_subkey(subkey).and_then(|p| p.forward(&value)) {
        Some(converted) => converted,
        None => value,
    }
}

/// Converts a stored value into the form it is edited in.
pub fn to_display(subkey: &Subkey, value: Value) -> Value {
    if value.value_type() != subkey.value_type {
        return value;
    }
    match for_subkey(subkey).and_then(|p| p.inverse(&value)) {
        Some(converted) => converted,
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_processors() {
        for name in ["date-string", "hex", "comma-list", "int-string"] {
            assert!(lookup(name).is_some(), "missing processor {}", name);
        }
        assert!(lookup("rot13").is_none());
    }

    #[test]
    fn test_hex_forward_and_inverse() {
        let hex = lookup("hex").unwrap();
        let stored = hex.forward(&Value::Str("de ad be ef".into())).unwrap();
        assert_eq!(stored, Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(hex.inverse(&stored), Some(Value::Str("deadbeef".into())));
        assert!(hex.forward(&Value::Str("zz".into())).is_none());
    }

    #[test]
    fn test_comma_list() {
        let list = lookup("comma-list").unwrap();
        let stored = list.forward(&Value::Str("a, b,,c".into())).unwrap();
        assert_eq!(
            stored,
            Value::List(vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into())
            ])
        );
        assert_eq!(list.inverse(&stored), Some(Value::Str("a, b, c".into())));
    }

    #[test]
    fn test_date_string() {
        let date = lookup("date-string").unwrap();
        let stored = date
            .forward(&Value::Str("2024-03-01T12:00:00Z".into()))
            .unwrap();
        assert!(matches!(stored, Value::Date(_)));
        assert_eq!(
            date.inverse(&stored),
            Some(Value::Str("2024-03-01T12:00:00Z".into()))
        );
    }
}
