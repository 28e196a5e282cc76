//! Optimistic edit tracking for database grids.
//!
//! Each mounted cell keeps a linear undo/redo [`CellHistory`]. Whenever a cell's current value
//! drifts from its baseline, the engine synthesizes one `UPDATE` statement for it and parks it in
//! the owning target's [`ScriptBatch`]. Nothing touches the database until [`EditSession::run`]
//! submits the batch as a single script; success promotes every pending value to its cell's new
//! baseline, failure leaves the batch intact for a retry.

mod batch;
mod controller;
mod error;
mod executor;
mod history;
mod ids;
mod limits;
mod mutation;
mod session;

pub use batch::{PendingCommand, ScriptBatch, Settle, SettleCallback};
pub use controller::{BatchController, RunReport, RunState, RunTicket};
pub use error::{EditError, ExecError, RoutingError, RunError, ValidationError};
pub use executor::{DisplaySource, ScriptExecutor};
pub use history::CellHistory;
pub use ids::{CellId, CommandId, TargetId};
pub use limits::{
    enforce_cell_text_size, enforce_script_size, EngineConfig, MAX_CELL_TEXT_BYTES,
    MAX_PENDING_COMMANDS, MAX_SCRIPT_BYTES,
};
pub use mutation::{derive as derive_mutation, update_statement, CellTarget, MutationEvent};
pub use session::{CellSpec, DisplayUpdate, EditSession};
