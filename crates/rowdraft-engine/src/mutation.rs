use rowdraft_model::{quote_text, synthesize, RejectReason, SqlLiteral, ValueTag};
use serde::{Deserialize, Serialize};

use crate::history::CellHistory;

/// Where an edited cell lives in the database.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellTarget {
    pub table: String,
    pub column: String,
    pub pk_column: String,
    pub pk_value: String,
}

/// What the batch should do with a cell's pending command after a history change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationEvent {
    /// Insert or replace the cell's pending statement.
    Upsert(String),
    /// The cell is back at its baseline; drop its pending statement.
    Remove,
    /// Nothing to do.
    Unchanged,
}

/// Derive the batch operation for `history`'s current value.
///
/// Returning to the baseline always clears pending state, wherever the cursor sits.
/// A `None` current value renders as `NULL` whatever the tag.
pub fn derive(
    target: &CellTarget,
    tag: ValueTag,
    history: &CellHistory,
    has_pending: bool,
) -> Result<MutationEvent, RejectReason> {
    if history.current() == history.baseline() {
        return Ok(if has_pending {
            MutationEvent::Remove
        } else {
            MutationEvent::Unchanged
        });
    }

    let literal = match history.current() {
        None => SqlLiteral::null(),
        Some(text) => synthesize(tag, text)?,
    };
    Ok(MutationEvent::Upsert(update_statement(target, &literal)))
}

/// `UPDATE {table} SET {column} = {literal} WHERE {pk_column} = '{pk_value}';`
///
/// The key is always compared as a quoted string, whatever its column type.
pub fn update_statement(target: &CellTarget, literal: &SqlLiteral) -> String {
    format!(
        "UPDATE {} SET {} = {} WHERE {} = {};",
        target.table,
        target.column,
        literal,
        target.pk_column,
        quote_text(&target.pk_value)
    )
}
