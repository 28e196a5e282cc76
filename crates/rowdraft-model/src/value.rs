use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;

/// Text the grid renders for a cell whose display is `None`.
pub const NULL_PLACEHOLDER: &str = "[NULL]";

/// Timestamp layout used for both display text and synthesized date literals.
/// The fraction prints as many digits as the value needs (none, 3, 6 or 9), so stored
/// microseconds and nanoseconds survive an edit round trip.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Semantic type of a stored value.
///
/// The tag is decided by the shape of the value itself; column metadata may
/// override it when a cell is loaded as `NULL` (see `rowdraft-engine`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueTag {
    Null,
    Boolean,
    Number,
    String,
    Date,
    Json,
    Array,
    Unknown,
}

impl ValueTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueTag::Null => "null",
            ValueTag::Boolean => "boolean",
            ValueTag::Number => "number",
            ValueTag::String => "string",
            ValueTag::Date => "date",
            ValueTag::Json => "json",
            ValueTag::Array => "array",
            ValueTag::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value as handed over by the row loader, before classification.
#[derive(Clone, Debug, PartialEq)]
pub enum RawValue {
    /// The loader had no value at all for the cell.
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    /// Exact decimal text (e.g. `NUMERIC` columns or integers beyond 2^53).
    Decimal(String),
    Text(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<JsonValue>),
    Object(Map<String, JsonValue>),
    /// Opaque bytes; there is no editable text form.
    Binary(Vec<u8>),
}

impl From<JsonValue> for RawValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => RawValue::Null,
            JsonValue::Bool(b) => RawValue::Bool(b),
            JsonValue::Number(n) => RawValue::Number(n),
            JsonValue::String(s) => RawValue::Text(s),
            JsonValue::Array(items) => RawValue::Array(items),
            JsonValue::Object(map) => RawValue::Object(map),
        }
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Number(Number::from(value))
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<DateTime<Utc>> for RawValue {
    fn from(value: DateTime<Utc>) -> Self {
        RawValue::Timestamp(value)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RawValue::Null)
    }
}

/// Result of [`classify`]: the semantic tag plus the canonical display text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classified {
    pub tag: ValueTag,
    /// `None` for `Null` and `Unknown` values.
    pub display: Option<String>,
}

impl Classified {
    fn new(tag: ValueTag, display: impl Into<String>) -> Self {
        Self {
            tag,
            display: Some(display.into()),
        }
    }

    fn empty(tag: ValueTag) -> Self {
        Self { tag, display: None }
    }

    /// Display text with `None` rendered as [`NULL_PLACEHOLDER`].
    pub fn display_or_placeholder(&self) -> &str {
        self.display.as_deref().unwrap_or(NULL_PLACEHOLDER)
    }
}

/// Classify a raw value into its [`ValueTag`] and canonical display string.
pub fn classify(value: &RawValue) -> Classified {
    match value {
        RawValue::Undefined | RawValue::Null => Classified::empty(ValueTag::Null),
        RawValue::Bool(b) => Classified::new(ValueTag::Boolean, if *b { "true" } else { "false" }),
        RawValue::Number(n) => Classified::new(ValueTag::Number, format_number(n)),
        RawValue::Decimal(text) => Classified::new(ValueTag::Number, text.as_str()),
        RawValue::Text(s) => Classified::new(ValueTag::String, s.as_str()),
        RawValue::Timestamp(ts) => Classified::new(ValueTag::Date, format_timestamp(ts)),
        RawValue::Array(items) => Classified::new(
            ValueTag::Array,
            JsonValue::Array(items.clone()).to_string(),
        ),
        RawValue::Object(map) => {
            Classified::new(ValueTag::Json, JsonValue::Object(map.clone()).to_string())
        }
        RawValue::Binary(_) => Classified::empty(ValueTag::Unknown),
    }
}

/// Render a timestamp the way cells display it (ISO-8601, UTC, full sub-second precision).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn format_number(n: &Number) -> String {
    // Integers render through their exact integer text; only true floats go through f64.
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    n.as_f64()
        .map(|f| f.to_string())
        .unwrap_or_else(|| n.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn null_and_undefined_have_no_display() {
        assert_eq!(classify(&RawValue::Null), Classified::empty(ValueTag::Null));
        assert_eq!(classify(&RawValue::Undefined), Classified::empty(ValueTag::Null));
        assert_eq!(classify(&RawValue::Null).display_or_placeholder(), NULL_PLACEHOLDER);
    }

    #[test]
    fn binary_values_are_unknown() {
        let classified = classify(&RawValue::Binary(vec![0xde, 0xad]));
        assert_eq!(classified.tag, ValueTag::Unknown);
        assert_eq!(classified.display, None);
    }

    #[test]
    fn numbers_render_exactly() {
        assert_eq!(classify(&RawValue::from(5i64)).display.as_deref(), Some("5"));
        assert_eq!(
            classify(&RawValue::Number(Number::from(u64::MAX))).display.as_deref(),
            Some("18446744073709551615")
        );
        let big = RawValue::Decimal("123456789012345678901234567890".to_string());
        assert_eq!(
            classify(&big),
            Classified::new(ValueTag::Number, "123456789012345678901234567890")
        );
        let float = RawValue::from(json!(1.5));
        assert_eq!(classify(&float).display.as_deref(), Some("1.5"));
    }

    #[test]
    fn timestamps_render_as_iso_utc() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).single().unwrap();
        let classified = classify(&RawValue::Timestamp(ts));
        assert_eq!(classified.tag, ValueTag::Date);
        assert_eq!(classified.display.as_deref(), Some("2024-03-09T14:05:07Z"));

        let millis = ts + chrono::Duration::milliseconds(250);
        assert_eq!(format_timestamp(&millis), "2024-03-09T14:05:07.250Z");
    }

    #[test]
    fn sub_millisecond_timestamps_keep_their_precision() {
        let micros = DateTime::<Utc>::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(format_timestamp(&micros), "2023-11-14T22:13:20.123456Z");
        let nanos = DateTime::<Utc>::from_timestamp(1_700_000_000, 5).unwrap();
        assert_eq!(format_timestamp(&nanos), "2023-11-14T22:13:20.000000005Z");
    }

    #[test]
    fn structured_values_render_as_json_text() {
        let array = RawValue::from(json!([1, "two", null]));
        assert_eq!(
            classify(&array),
            Classified::new(ValueTag::Array, r#"[1,"two",null]"#)
        );
        let object = RawValue::from(json!({"a": {"b": true}}));
        assert_eq!(
            classify(&object),
            Classified::new(ValueTag::Json, r#"{"a":{"b":true}}"#)
        );
    }

    #[test]
    fn value_tag_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ValueTag::Json).unwrap(), "\"json\"");
        let tag: ValueTag = serde_json::from_str("\"date\"").unwrap();
        assert_eq!(tag, ValueTag::Date);
    }
}
