use std::future::Future;

use rowdraft_model::RawValue;

use crate::error::ExecError;
use crate::ids::TargetId;
use crate::session::CellSpec;

/// Runs a combined script as a single request against a live connection.
pub trait ScriptExecutor: Send + Sync {
    fn execute(
        &self,
        target: &TargetId,
        script: &str,
    ) -> impl Future<Output = Result<(), ExecError>> + Send;
}

/// Supplies the value a cell shows when it is first mounted.
pub trait DisplaySource {
    fn load_display_value(&self, cell: &CellSpec) -> RawValue;
}
