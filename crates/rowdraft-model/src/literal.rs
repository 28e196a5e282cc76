use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;

use crate::value::{format_timestamp, ValueTag};

/// A rendered SQL literal, safe to splice into a statement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SqlLiteral(String);

impl SqlLiteral {
    /// The `NULL` literal emitted by the explicit "set null" action.
    pub fn null() -> Self {
        SqlLiteral("NULL".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SqlLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a candidate string could not be turned into a literal for its tag.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    #[error("not a valid date or timestamp")]
    InvalidDate,
    #[error("not a finite number")]
    InvalidNumber,
    #[error("expected `true` or `false`")]
    InvalidBoolean,
    #[error("not valid JSON for this column")]
    InvalidStructured,
    #[error("{0} values cannot be edited as text")]
    Unsupported(ValueTag),
}

/// Validate `candidate` against `tag` and render it as a SQL literal.
///
/// `Null` and `Unknown` are never synthesized here; clearing a cell goes through
/// [`SqlLiteral::null`] instead.
pub fn synthesize(tag: ValueTag, candidate: &str) -> Result<SqlLiteral, RejectReason> {
    match tag {
        ValueTag::Date => parse_timestamp(candidate)
            .map(|ts| SqlLiteral(quote_text(&format_timestamp(&ts))))
            .ok_or(RejectReason::InvalidDate),
        ValueTag::Number => canonical_number(candidate)
            .map(SqlLiteral)
            .ok_or(RejectReason::InvalidNumber),
        ValueTag::Boolean => match candidate {
            "true" | "false" => Ok(SqlLiteral(candidate.to_string())),
            _ => Err(RejectReason::InvalidBoolean),
        },
        ValueTag::Json | ValueTag::Array => {
            let parsed: JsonValue =
                serde_json::from_str(candidate).map_err(|_| RejectReason::InvalidStructured)?;
            if tag == ValueTag::Array && !parsed.is_array() {
                return Err(RejectReason::InvalidStructured);
            }
            Ok(SqlLiteral(quote_text(&parsed.to_string())))
        }
        ValueTag::String => Ok(SqlLiteral(quote_text(candidate))),
        ValueTag::Null | ValueTag::Unknown => Err(RejectReason::Unsupported(tag)),
    }
}

/// Wrap `text` in single quotes, doubling any embedded single quote.
pub fn quote_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Parse the timestamp spellings accepted from the grid editor. Offsets are normalized to UTC;
/// inputs without an offset are taken as UTC.
pub fn parse_timestamp(candidate: &str) -> Option<DateTime<Utc>> {
    let text = candidate.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Canonical decimal text for a numeric candidate, or `None` if it is not a finite number.
///
/// Plain decimals are normalized textually so integers wider than an `f64` mantissa survive
/// unchanged; exponent forms are evaluated as `f64`.
pub fn canonical_number(candidate: &str) -> Option<String> {
    let text = candidate.trim();
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    if unsigned.contains(['e', 'E']) {
        let value: f64 = text.parse().ok()?;
        return value.is_finite().then(|| value.to_string());
    }

    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }

    let int_digits = int_part.trim_start_matches('0');
    let frac_digits = frac_part.trim_end_matches('0');
    let mut out = String::with_capacity(unsigned.len() + 1);
    if negative && !(int_digits.is_empty() && frac_digits.is_empty()) {
        out.push('-');
    }
    out.push_str(if int_digits.is_empty() { "0" } else { int_digits });
    if !frac_digits.is_empty() {
        out.push('.');
        out.push_str(frac_digits);
    }
    Some(out)
}
