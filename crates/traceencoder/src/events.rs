//! Span events and their two encodings.
//!
//! Agents that understand native span events get a top-level `span_events`
//! array with typed attributes:
//!
//! | `type` | Value key      | Attribute value      |
//! |--------|----------------|----------------------|
//! | 0      | `string_value` | string               |
//! | 1      | `bool_value`   | boolean              |
//! | 2      | `int_value`    | integer              |
//! | 3      | `double_value` | float                |
//! | 4      | `array_value`  | `{values: [...]}` of types 0 to 3 |
//!
//! Any other attribute (objects, nested arrays, null) is left out. Older
//! agents get the events as a JSON string under the `events` meta key.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::types::Result;

/// Meta key holding the JSON form of a span's events.
pub const EVENTS_KEY: &str = "events";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nano: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, JsonValue>>,
}

/// Serializes `events` for the `events` meta tag.
pub fn to_json(events: &[SpanEvent]) -> Result<String> {
    Ok(serde_json::to_string(events)?)
}

/// An attribute value the native encoding can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute<'a> {
    Str(&'a str),
    Bool(bool),
    Int(i64),
    /// Integers above `i64::MAX`.
    UInt(u64),
    Double(f64),
    Array(Vec<Attribute<'a>>),
}

impl<'a> Attribute<'a> {
    /// A scalar attribute. Arrays are only accepted at the top level.
    fn scalar(value: &'a JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(Attribute::Str(s)),
            JsonValue::Bool(b) => Some(Attribute::Bool(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Attribute::Int)
                .or_else(|| n.as_u64().map(Attribute::UInt))
                .or_else(|| n.as_f64().map(Attribute::Double)),
            _ => None,
        }
    }

    /// Converts `value`, dropping unsupported array elements. An array left
    /// with no elements is unsupported as a whole.
    pub fn from_json(value: &'a JsonValue) -> Option<Self> {
        match value {
            JsonValue::Array(items) => {
                let values: Vec<_> = items.iter().filter_map(Attribute::scalar).collect();
                (!values.is_empty()).then_some(Attribute::Array(values))
            }
            other => Attribute::scalar(other),
        }
    }

    pub fn type_code(&self) -> u8 {
        match self {
            Attribute::Str(_) => 0,
            Attribute::Bool(_) => 1,
            Attribute::Int(_) | Attribute::UInt(_) => 2,
            Attribute::Double(_) => 3,
            Attribute::Array(_) => 4,
        }
    }

    pub fn value_key(&self) -> &'static str {
        match self {
            Attribute::Str(_) => "string_value",
            Attribute::Bool(_) => "bool_value",
            Attribute::Int(_) | Attribute::UInt(_) => "int_value",
            Attribute::Double(_) => "double_value",
            Attribute::Array(_) => "array_value",
        }
    }
}

/// The typed attributes of `event`, in their original order. `unsupported`
/// is called with the key of every attribute left out.
pub fn typed_attributes<'a, F>(event: &'a SpanEvent, mut unsupported: F) -> Vec<(&'a str, Attribute<'a>)>
where
    F: FnMut(&str),
{
    let Some(attributes) = &event.attributes else {
        return Vec::new();
    };
    attributes
        .iter()
        .filter_map(|(key, value)| match Attribute::from_json(value) {
            Some(attr) => Some((key.as_str(), attr)),
            None => {
                unsupported(key);
                None
            }
        })
        .collect()
}
