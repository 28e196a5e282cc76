use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rowdraft_model::{classify, parse_timestamp, synthesize, RawValue, ValueTag};
use serde_json::{json, Value as JsonValue};

fn unquote(literal: &str) -> String {
    let inner = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or_else(|| panic!("expected quoted literal, got {literal}"));
    inner.replace("''", "'")
}

fn arb_json_leaf() -> impl Strategy<Value = JsonValue> {
    prop_oneof![
        Just(JsonValue::Null),
        any::<bool>().prop_map(JsonValue::from),
        any::<i32>().prop_map(JsonValue::from),
        "[a-z' ]{0,8}".prop_map(JsonValue::from),
    ]
}

fn arb_raw_value() -> impl Strategy<Value = RawValue> {
    prop_oneof![
        any::<bool>().prop_map(RawValue::Bool),
        any::<i64>().prop_map(RawValue::from),
        (-1.0e12f64..1.0e12f64).prop_map(|f| RawValue::from(json!(f))),
        "(0|[1-9][0-9]{0,40})".prop_map(RawValue::Decimal),
        ".{0,16}".prop_map(RawValue::Text),
        // Microsecond precision, years 1970..2100.
        (0i64..4_102_444_800_000_000).prop_map(|us| {
            RawValue::Timestamp(DateTime::<Utc>::from_timestamp_micros(us).expect("in range"))
        }),
        prop::collection::vec(arb_json_leaf(), 0..5).prop_map(RawValue::Array),
        prop::collection::btree_map("[a-z]{1,4}", arb_json_leaf(), 0..4)
            .prop_map(|m| RawValue::Object(m.into_iter().collect())),
    ]
}

proptest! {
    #[test]
    fn display_text_synthesizes_back_to_the_same_value(value in arb_raw_value()) {
        let classified = classify(&value);
        let display = classified.display.clone().expect("non-null values have display text");
        let literal = synthesize(classified.tag, &display)
            .unwrap_or_else(|err| panic!("{value:?} ({display}) rejected: {err}"))
            .into_string();

        match (&value, classified.tag) {
            (RawValue::Bool(b), ValueTag::Boolean) => prop_assert_eq!(literal, b.to_string()),
            (RawValue::Number(n), ValueTag::Number) => {
                if let Some(i) = n.as_i64() {
                    prop_assert_eq!(literal.parse::<i64>().ok(), Some(i));
                } else {
                    prop_assert_eq!(literal.parse::<f64>().ok(), n.as_f64());
                }
            }
            (RawValue::Decimal(text), ValueTag::Number) => prop_assert_eq!(&literal, text),
            (RawValue::Text(s), ValueTag::String) => prop_assert_eq!(&unquote(&literal), s),
            (RawValue::Timestamp(ts), ValueTag::Date) => {
                prop_assert_eq!(parse_timestamp(&unquote(&literal)), Some(*ts));
            }
            (RawValue::Array(items), ValueTag::Array) => {
                let parsed: JsonValue = serde_json::from_str(&unquote(&literal)).unwrap();
                prop_assert_eq!(parsed, JsonValue::Array(items.clone()));
            }
            (RawValue::Object(map), ValueTag::Json) => {
                let parsed: JsonValue = serde_json::from_str(&unquote(&literal)).unwrap();
                prop_assert_eq!(parsed, JsonValue::Object(map.clone()));
            }
            (other, tag) => panic!("unexpected classification {tag} for {other:?}"),
        }
    }
}

#[test]
fn unknown_values_do_not_synthesize() {
    let classified = classify(&RawValue::Binary(vec![1, 2, 3]));
    assert_eq!(classified.tag, ValueTag::Unknown);
    assert!(synthesize(classified.tag, "anything").is_err());
}
