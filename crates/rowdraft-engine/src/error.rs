use rowdraft_model::RejectReason;
use serde::Serialize;

use crate::ids::{CellId, TargetId};

/// Edit rejected before it reached the history. Recovered locally: the cell keeps its
/// last good value and the UI shows an inline hint.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum ValidationError {
    #[error(transparent)]
    Literal(#[from] RejectReason),
    #[error("column `{column}` does not accept NULL")]
    NotNullable { column: String },
    #[error("cell text is too large ({bytes} bytes, max {limit})")]
    TooLarge { bytes: usize, limit: usize },
}

/// Edit addressed to a batch that cannot take it right now.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RoutingError {
    #[error("no active database; select one before editing")]
    NoActiveTarget,
    #[error("cell belongs to `{requested}` but `{active}` is the active database")]
    InactiveTarget { active: TargetId, requested: TargetId },
    #[error("batch for `{batch}` cannot accept statements for `{requested}`")]
    TargetMismatch { batch: TargetId, requested: TargetId },
    #[error("changes for `{target}` are being executed")]
    TargetRunning { target: TargetId },
}

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("unknown cell id: {0}")]
    UnknownCell(CellId),
    #[error("too many pending changes (max {limit})")]
    BatchFull { limit: usize },
}

/// Failure reported by the connector while executing a combined script.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize)]
#[error("{message}")]
pub struct ExecError {
    pub message: String,
}

impl ExecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("execution failed: {0}")]
    Exec(#[from] ExecError),
    #[error("no pending changes for `{0}`")]
    EmptyBatch(TargetId),
    #[error("changes for `{0}` are already being executed")]
    AlreadyRunning(TargetId),
    #[error("combined script is too large ({bytes} bytes, max {limit})")]
    ScriptTooLarge { bytes: usize, limit: usize },
}
