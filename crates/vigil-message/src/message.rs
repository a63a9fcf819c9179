//! The decoded message document and typed field access.
//!
//! A [`Message`] is parsed once per record and shared read-only by every
//! river that sees the record. Fields are addressed with dotted paths:
//! `@caused_by.event_name` walks into nested objects, and a numeric segment
//! (`employers.0.periods`) indexes into arrays.
//!
//! All typed accessors return `Result<T, FieldError>` and distinguish an
//! absent field from one holding the wrong kind of value.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::error::{DecodeError, FieldError};

/// The kinds of value a rule or accessor can demand from a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// ISO-8601 local date-time (`2024-03-01T10:00:00.123`), optionally
    /// carrying a UTC offset.
    DateTime,
    /// ISO-8601 calendar date (`2024-03-01`).
    Date,
    /// Any JSON number.
    Number,
    /// A JSON number that fits in an `i64`.
    Integer,
    /// A JSON boolean.
    Boolean,
    /// A JSON string.
    Text,
    /// A JSON array.
    Array,
}

impl ValueKind {
    /// Check whether a JSON value can be read as this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::DateTime => value.as_str().and_then(parse_datetime).is_some(),
            Self::Date => value.as_str().and_then(parse_date).is_some(),
            Self::Number => value.is_number(),
            Self::Integer => value.as_i64().is_some(),
            Self::Boolean => value.is_boolean(),
            Self::Text => value.is_string(),
            Self::Array => value.is_array(),
        }
    }

    /// Human-readable name used in problem reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DateTime => "date-time",
            Self::Date => "date",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, decoded rapid message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    root: Value,
}

impl Message {
    /// Decode a raw record value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] for malformed JSON and
    /// [`DecodeError::NotAnObject`] when the top level is not an object.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        let root: Value = serde_json::from_slice(bytes)?;
        Self::from_value(root)
    }

    /// Wrap an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::NotAnObject`] when `root` is not an object.
    pub fn from_value(root: Value) -> Result<Self, DecodeError> {
        if root.is_object() {
            Ok(Self { root })
        } else {
            Err(DecodeError::NotAnObject)
        }
    }

    /// Root node for path lookups.
    pub const fn root(&self) -> Node<'_> {
        Node(&self.root)
    }

    /// The underlying JSON document.
    pub const fn as_value(&self) -> &Value {
        &self.root
    }

    /// Serialize back to compact JSON (for logging and problem reports).
    pub fn to_json(&self) -> String {
        self.root.to_string()
    }
}

/// A borrowed position inside a message.
///
/// Nodes are cheap copies of a reference; array elements handed out by
/// [`Node::elements`] are nodes too, so nested documents use the same
/// accessors as the root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node<'a>(&'a Value);

impl<'a> Node<'a> {
    /// Wrap a JSON value.
    pub const fn new(value: &'a Value) -> Self {
        Self(value)
    }

    /// The JSON value at this node.
    pub const fn value(self) -> &'a Value {
        self.0
    }

    /// Walk a dotted path. Returns `None` when any segment is absent or the
    /// final value is JSON `null`.
    pub fn get(self, path: &str) -> Option<Self> {
        let mut current = self.0;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        if current.is_null() {
            None
        } else {
            Some(Self(current))
        }
    }

    /// Whether the path resolves to a non-null value.
    pub fn has(self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Resolve a path or report it as missing.
    pub fn require(self, path: &str) -> Result<Self, FieldError> {
        self.get(path).ok_or_else(|| FieldError::missing(path))
    }

    /// Read a string field.
    pub fn text(self, path: &str) -> Result<&'a str, FieldError> {
        self.require(path)?
            .0
            .as_str()
            .ok_or_else(|| FieldError::wrong_type(path, ValueKind::Text))
    }

    /// Read a boolean field.
    pub fn boolean(self, path: &str) -> Result<bool, FieldError> {
        self.require(path)?
            .0
            .as_bool()
            .ok_or_else(|| FieldError::wrong_type(path, ValueKind::Boolean))
    }

    /// Read an integer field.
    pub fn integer(self, path: &str) -> Result<i64, FieldError> {
        self.require(path)?
            .0
            .as_i64()
            .ok_or_else(|| FieldError::wrong_type(path, ValueKind::Integer))
    }

    /// Read a numeric field as `f64`.
    pub fn number(self, path: &str) -> Result<f64, FieldError> {
        self.require(path)?
            .0
            .as_f64()
            .ok_or_else(|| FieldError::wrong_type(path, ValueKind::Number))
    }

    /// Read a date-time field.
    pub fn datetime(self, path: &str) -> Result<NaiveDateTime, FieldError> {
        self.require(path)?
            .0
            .as_str()
            .and_then(parse_datetime)
            .ok_or_else(|| FieldError::wrong_type(path, ValueKind::DateTime))
    }

    /// Read a calendar date field.
    pub fn date(self, path: &str) -> Result<NaiveDate, FieldError> {
        self.require(path)?
            .0
            .as_str()
            .and_then(parse_date)
            .ok_or_else(|| FieldError::wrong_type(path, ValueKind::Date))
    }

    /// Read an array field as a list of nodes.
    pub fn elements(self, path: &str) -> Result<Vec<Self>, FieldError> {
        self.require(path)?
            .0
            .as_array()
            .map(|items| items.iter().map(Node).collect())
            .ok_or_else(|| FieldError::wrong_type(path, ValueKind::Array))
    }
}

/// Parse an ISO-8601 date-time as written by producers.
///
/// Local date-times keep their wall-clock value. Values with an offset keep
/// the wall-clock time as written, so producers mixing both styles still
/// compare sensibly within one entity.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    raw.parse::<NaiveDateTime>()
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
}

/// Parse an ISO-8601 calendar date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    raw.parse::<NaiveDate>().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Timelike;
    use serde_json::json;

    use super::*;

    fn message(value: Value) -> Message {
        Message::from_value(value).unwrap()
    }

    #[test]
    fn parse_rejects_non_objects() {
        assert!(matches!(Message::parse(b"[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(Message::parse(b"{nope"), Err(DecodeError::Json(_))));
        assert!(Message::parse(br#"{"a":1}"#).is_ok());
    }

    #[test]
    fn dotted_paths_walk_objects_and_arrays() {
        let msg = message(json!({
            "@caused_by": { "event_name": "new_application" },
            "employers": [ { "id": "A" }, { "id": "B" } ]
        }));
        let root = msg.root();
        assert_eq!(root.text("@caused_by.event_name"), Ok("new_application"));
        assert_eq!(root.text("employers.1.id"), Ok("B"));
        assert!(root.get("employers.2.id").is_none());
        assert!(root.get("employers.x").is_none());
    }

    #[test]
    fn null_counts_as_missing() {
        let msg = message(json!({ "deadline": null }));
        assert_eq!(
            msg.root().datetime("deadline"),
            Err(FieldError::Missing {
                path: "deadline".to_owned()
            })
        );
    }

    #[test]
    fn wrong_type_is_not_missing() {
        let msg = message(json!({ "count": "three" }));
        assert_eq!(
            msg.root().integer("count"),
            Err(FieldError::WrongType {
                path: "count".to_owned(),
                expected: ValueKind::Integer
            })
        );
    }

    #[test]
    fn datetimes_keep_sub_second_precision() {
        let msg = message(json!({
            "@created": "2024-03-01T10:00:00.123456789",
            "plain": "2024-03-01T10:00:00",
            "offset": "2024-03-01T10:00:00+01:00"
        }));
        let created = msg.root().datetime("@created").unwrap();
        assert_eq!(created.nanosecond(), 123_456_789);
        assert_eq!(msg.root().datetime("plain").unwrap().hour(), 10);
        assert_eq!(msg.root().datetime("offset").unwrap().hour(), 10);
    }

    #[test]
    fn value_kinds_classify_values() {
        assert!(ValueKind::DateTime.accepts(&json!("2024-03-01T10:00:00")));
        assert!(!ValueKind::DateTime.accepts(&json!("yesterday")));
        assert!(ValueKind::Date.accepts(&json!("2024-03-01")));
        assert!(!ValueKind::Date.accepts(&json!(20_240_301)));
        assert!(ValueKind::Integer.accepts(&json!(3)));
        assert!(!ValueKind::Integer.accepts(&json!(3.5)));
        assert!(ValueKind::Number.accepts(&json!(3.5)));
    }
}
