//! Dynamic value type carried by properties.
//!
//! Ordinary data wraps `serde_json::Value` behind an `Arc`, so propagating a
//! large object through a chain of bindings clones a pointer, not the data.
//! Two extra variants cover what JSON cannot express: [`Value::Block`] marks
//! a property that owns a child block, and [`Value::Event`] carries the
//! non-data sentinels of [`crate::event`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::event::Event;
use crate::types::BlockId;

/// A JSON object used for serialized block data.
///
/// Keys keep insertion order (`serde_json` with `preserve_order`), so a
/// saved flow round-trips in the order its fields were created.
pub type DataMap = serde_json::Map<String, JsonValue>;

/// The value held by a property.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value. Properties start here and return here when cleared.
    #[default]
    Absent,
    /// Ordinary data: null, bool, number, string, array, or object.
    Data(Arc<JsonValue>),
    /// A child block owned by this property.
    Block(BlockId),
    /// A non-data sentinel (pending, declined, or failed).
    Event(Event),
}

impl Value {
    /// Create a null data value. Distinct from [`Value::Absent`]: null is a
    /// real value that was explicitly set.
    pub fn null() -> Self {
        Self::Data(Arc::new(JsonValue::Null))
    }

    /// Create a boolean value.
    pub fn bool(v: bool) -> Self {
        Self::Data(Arc::new(JsonValue::Bool(v)))
    }

    /// Create an integer value.
    pub fn int(v: i64) -> Self {
        Self::Data(Arc::new(JsonValue::Number(v.into())))
    }

    /// Create a floating-point value. Non-finite floats become null, which
    /// is what they would turn into on serialization anyway.
    pub fn float(v: f64) -> Self {
        Self::Data(Arc::new(
            serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number),
        ))
    }

    /// Create a string value.
    pub fn string(v: impl Into<String>) -> Self {
        Self::Data(Arc::new(JsonValue::String(v.into())))
    }

    /// Wrap an arbitrary JSON value.
    pub fn data(v: JsonValue) -> Self {
        Self::Data(Arc::new(v))
    }

    /// Whether this is [`Value::Absent`].
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Whether this carries an [`Event`] sentinel.
    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }

    /// Whether this holds a child block.
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }

    /// The wrapped JSON value, if this is ordinary data.
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Data(v) => Some(v),
            _ => None,
        }
    }

    /// The child block id, if this holds one.
    pub fn as_block(&self) -> Option<BlockId> {
        match self {
            Self::Block(id) => Some(*id),
            _ => None,
        }
    }

    /// The sentinel, if this carries one.
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(ev) => Some(ev),
            _ => None,
        }
    }

    /// The value as a bool, if it is boolean data.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(JsonValue::as_bool)
    }

    /// The value as an integer, if it is integral numeric data.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(JsonValue::as_i64)
    }

    /// The value as a float, if it is numeric data.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(JsonValue::as_f64)
    }

    /// The value as a string slice, if it is string data.
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(JsonValue::as_str)
    }

    /// The value as a JSON object, if it is object data.
    pub fn as_object(&self) -> Option<&DataMap> {
        self.as_json().and_then(JsonValue::as_object)
    }

    /// The value as a JSON array, if it is array data.
    pub fn as_array(&self) -> Option<&Vec<JsonValue>> {
        self.as_json().and_then(JsonValue::as_array)
    }

    /// Look up `field` in a data object, or index a data array when `field`
    /// parses as an index. This is the single-level drill used by bindings
    /// whose final path segment lands inside plain data.
    pub fn field(&self, field: &str) -> Value {
        let Some(json) = self.as_json() else {
            return Value::Absent;
        };
        let inner = match json {
            JsonValue::Object(map) => map.get(field),
            JsonValue::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        inner.cloned().map_or(Value::Absent, Value::data)
    }

    /// Loose truthiness for logic functions: absent, events, null, `false`,
    /// `0`, and `""` are false; everything else is true.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Absent | Self::Event(_) => false,
            Self::Block(_) => true,
            Self::Data(json) => match json.as_ref() {
                JsonValue::Null => false,
                JsonValue::Bool(b) => *b,
                JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
                JsonValue::String(s) => !s.is_empty(),
                JsonValue::Array(_) | JsonValue::Object(_) => true,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "<absent>"),
            Self::Data(json) => write!(f, "{json}"),
            Self::Block(id) => write!(f, "<{id}>"),
            Self::Event(ev) => write!(f, "{ev}"),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Self::data(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::string(v)
    }
}

impl From<Event> for Value {
    fn from(ev: Event) -> Self {
        Self::Event(ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_and_null_are_different() {
        assert!(Value::Absent.is_absent());
        assert!(!Value::null().is_absent());
        assert_ne!(Value::Absent, Value::null());
    }

    #[test]
    fn equality_is_by_content() {
        assert_eq!(Value::int(5), Value::data(json!(5)));
        assert_eq!(
            Value::data(json!({"a": [1, 2]})),
            Value::data(json!({"a": [1, 2]})),
        );
        assert_ne!(Value::int(5), Value::float(5.5));
    }

    #[test]
    fn field_drills_objects_and_arrays() {
        let obj = Value::data(json!({"x": 1, "y": {"z": 2}}));
        assert_eq!(obj.field("x"), Value::int(1));
        assert_eq!(obj.field("missing"), Value::Absent);
        let arr = Value::data(json!([10, 20, 30]));
        assert_eq!(arr.field("1"), Value::int(20));
        assert_eq!(arr.field("9"), Value::Absent);
        assert_eq!(Value::int(3).field("x"), Value::Absent);
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::int(7).as_i64(), Some(7));
        assert_eq!(Value::int(7).as_f64(), Some(7.0));
        assert_eq!(Value::string("hi").as_str(), Some("hi"));
        assert_eq!(Value::bool(true).as_bool(), Some(true));
        assert!(Value::string("hi").as_i64().is_none());
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Absent.truthy());
        assert!(!Value::null().truthy());
        assert!(!Value::int(0).truthy());
        assert!(!Value::string("").truthy());
        assert!(!Value::Event(Event::wait()).truthy());
        assert!(Value::int(1).truthy());
        assert!(Value::string("0").truthy());
        assert!(Value::data(json!([])).truthy());
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(3i64), Value::int(3));
        assert_eq!(Value::from("s"), Value::string("s"));
        assert_eq!(Value::from(true), Value::bool(true));
    }
}
