//! `rowdraft-model` holds the value-level building blocks of the edit engine:
//! - [`RawValue`]: the shape a row loader hands over for a cell
//! - [`classify`]: raw value to [`ValueTag`] + canonical display text
//! - [`synthesize`]: edited text to a SQL-safe literal (or a [`RejectReason`])
//!
//! Nothing in here performs I/O; both entry points are pure.

mod literal;
mod value;

pub use literal::{
    canonical_number, parse_timestamp, quote_text, synthesize, RejectReason, SqlLiteral,
};
pub use value::{
    classify, format_timestamp, Classified, RawValue, ValueTag, NULL_PLACEHOLDER, TIMESTAMP_FORMAT,
};
