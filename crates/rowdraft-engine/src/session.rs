use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rowdraft_model::{classify, RawValue, ValueTag, NULL_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::{Settle, SettleCallback};
use crate::controller::{BatchController, RunReport, RunState};
use crate::error::{EditError, RoutingError, RunError, ValidationError};
use crate::executor::{DisplaySource, ScriptExecutor};
use crate::history::CellHistory;
use crate::ids::{CellId, TargetId};
use crate::limits::{enforce_cell_text_size, EngineConfig};
use crate::mutation::{self, CellTarget, MutationEvent};

/// Everything the engine needs to know about an editable cell when it mounts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSpec {
    pub target: TargetId,
    pub table: String,
    pub column: String,
    pub pk_column: String,
    pub pk_value: String,
    /// Gates the explicit "set null" action.
    #[serde(default)]
    pub nullable: bool,
    /// Declared column type, used when the loaded value itself is `NULL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<ValueTag>,
}

impl CellSpec {
    pub fn new(
        target: impl Into<TargetId>,
        table: impl Into<String>,
        column: impl Into<String>,
        pk_column: impl Into<String>,
        pk_value: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            table: table.into(),
            column: column.into(),
            pk_column: pk_column.into(),
            pk_value: pk_value.into(),
            nullable: false,
            column_type: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn column_type(mut self, tag: ValueTag) -> Self {
        self.column_type = Some(tag);
        self
    }

    pub fn cell_id(&self) -> CellId {
        CellId::derive(&self.target, &self.table, &self.column, &self.pk_value)
    }

    pub fn cell_target(&self) -> CellTarget {
        CellTarget {
            table: self.table.clone(),
            column: self.column.clone(),
            pk_column: self.pk_column.clone(),
            pk_value: self.pk_value.clone(),
        }
    }

    /// The value's own shape wins; the declared type only fills in for `NULL` cells, and
    /// a `NULL` cell with no declared type edits as text.
    fn edit_tag(&self, loaded: ValueTag) -> ValueTag {
        match loaded {
            ValueTag::Null => self
                .column_type
                .filter(|tag| *tag != ValueTag::Null)
                .unwrap_or(ValueTag::String),
            tag => tag,
        }
    }
}

/// What the grid should render for a cell after an operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayUpdate {
    pub cell: CellId,
    pub text: Option<String>,
    pub dirty: bool,
    pub can_undo: bool,
    pub can_redo: bool,
    /// Set when the edit was refused; `text` is then the last good value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<ValidationError>,
}

impl DisplayUpdate {
    fn of(cell: CellId, history: &CellHistory) -> Self {
        Self {
            cell,
            text: history.current().map(str::to_string),
            dirty: history.is_dirty(),
            can_undo: history.can_undo(),
            can_redo: history.can_redo(),
            rejected: None,
        }
    }

    fn rejected(cell: CellId, history: &CellHistory, reason: ValidationError) -> Self {
        Self {
            rejected: Some(reason),
            ..Self::of(cell, history)
        }
    }

    pub fn display_text(&self) -> &str {
        self.text.as_deref().unwrap_or(NULL_PLACEHOLDER)
    }
}

type SharedHistory = Arc<Mutex<CellHistory>>;
type RefreshHook = Arc<dyn Fn(&TargetId) + Send + Sync>;

struct MountedCell {
    spec: CellSpec,
    location: CellTarget,
    tag: ValueTag,
    history: SharedHistory,
}

struct SessionState {
    controller: BatchController,
    cells: HashMap<CellId, MountedCell>,
    refresh: Option<RefreshHook>,
}

fn lock_history(history: &Mutex<CellHistory>) -> MutexGuard<'_, CellHistory> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

fn settle_callback(cell: CellId, history: Weak<Mutex<CellHistory>>) -> SettleCallback {
    Box::new(move |settle: Settle| {
        let Some(history) = history.upgrade() else {
            debug!(%cell, ?settle, "settled a command whose cell is no longer mounted");
            return;
        };
        let mut history = lock_history(&history);
        match settle {
            Settle::Run => {
                let committed = history.current().map(str::to_string);
                history.reset(Some(committed));
            }
            Settle::Clear => {
                history.reset(None);
            }
        }
    })
}

impl SessionState {
    /// Run `op` against a cell's history and reconcile the target's batch.
    ///
    /// All-or-nothing: a rejected or misrouted edit leaves both history and batch untouched.
    fn apply(
        &mut self,
        id: &CellId,
        op: impl FnOnce(&MountedCell, &mut CellHistory) -> Result<(), ValidationError>,
    ) -> Result<DisplayUpdate, EditError> {
        let Some(cell) = self.cells.get(id) else {
            debug!(cell = %id, "ignoring operation on an unknown cell");
            return Err(EditError::UnknownCell(*id));
        };
        let target = &cell.spec.target;
        if self.controller.is_running(target) {
            return Err(RoutingError::TargetRunning {
                target: target.clone(),
            }
            .into());
        }
        let has_pending = self.controller.has_pending(target, id);

        let mut history = lock_history(&cell.history);
        let before = history.clone();
        if let Err(rejection) = op(cell, &mut *history) {
            debug!(cell = %id, %rejection, "edit rejected");
            return Ok(DisplayUpdate::rejected(*id, &history, rejection));
        }

        let event = match mutation::derive(&cell.location, cell.tag, &history, has_pending) {
            Ok(event) => event,
            Err(reason) => {
                debug!(cell = %id, %reason, "edit rejected");
                *history = before;
                return Ok(DisplayUpdate::rejected(*id, &history, reason.into()));
            }
        };

        match event {
            MutationEvent::Upsert(statement) => {
                let callback = settle_callback(*id, Arc::downgrade(&cell.history));
                if let Err(err) = self.controller.upsert(target, *id, statement, callback) {
                    *history = before;
                    return Err(err);
                }
            }
            MutationEvent::Remove => {
                self.controller.remove(target, id);
            }
            MutationEvent::Unchanged => {}
        }
        Ok(DisplayUpdate::of(*id, &history))
    }

    fn display(&self, id: &CellId) -> Option<DisplayUpdate> {
        self.cells
            .get(id)
            .map(|cell| DisplayUpdate::of(*id, &lock_history(&cell.history)))
    }
}

/// Cloneable handle over the edit engine.
///
/// Every operation takes the internal lock briefly; [`EditSession::run`] releases it while the
/// connector is executing, so other targets stay editable during a run.
pub struct EditSession<E> {
    state: Arc<Mutex<SessionState>>,
    executor: Arc<E>,
}

impl<E> Clone for EditSession<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<E: ScriptExecutor> EditSession<E> {
    pub fn new(executor: E) -> Self {
        Self::with_config(executor, EngineConfig::default())
    }

    pub fn with_config(executor: E, config: EngineConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                controller: BatchController::new(config),
                cells: HashMap::new(),
                refresh: None,
            })),
            executor: Arc::new(executor),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the hook asking the surrounding view to reload after a commit.
    pub fn on_refresh(&self, hook: impl Fn(&TargetId) + Send + Sync + 'static) {
        self.lock().refresh = Some(Arc::new(hook));
    }

    pub fn set_active_target(&self, target: impl Into<TargetId>) {
        self.lock().controller.set_active_target(target.into());
    }

    pub fn active_target(&self) -> Option<TargetId> {
        self.lock().controller.active_target().cloned()
    }

    /// Start tracking a cell with its loaded value as baseline. Mounting an id that is
    /// already mounted replaces its history.
    pub fn mount_cell(&self, spec: CellSpec, raw: &RawValue) -> DisplayUpdate {
        let classified = classify(raw);
        let id = spec.cell_id();
        let tag = spec.edit_tag(classified.tag);
        let history = CellHistory::new(classified.display);
        let update = DisplayUpdate::of(id, &history);
        debug!(cell = %id, table = %spec.table, column = %spec.column, %tag, "mounted cell");
        self.lock().cells.insert(
            id,
            MountedCell {
                location: spec.cell_target(),
                spec,
                tag,
                history: Arc::new(Mutex::new(history)),
            },
        );
        update
    }

    pub fn mount_cell_from(&self, spec: CellSpec, source: &impl DisplaySource) -> DisplayUpdate {
        let raw = source.load_display_value(&spec);
        self.mount_cell(spec, &raw)
    }

    /// Drop a cell's history. Its pending command, if any, stays in the batch.
    pub fn unmount_cell(&self, cell: &CellId) -> bool {
        self.lock().cells.remove(cell).is_some()
    }

    pub fn display(&self, cell: &CellId) -> Option<DisplayUpdate> {
        self.lock().display(cell)
    }

    pub fn edit_cell(&self, cell: &CellId, new_text: &str) -> Result<DisplayUpdate, EditError> {
        let mut state = self.lock();
        let limit = state.controller.config().max_cell_text_bytes;
        state.apply(cell, |_, history| {
            enforce_cell_text_size(new_text, limit)?;
            history.set_value(Some(new_text.to_string()));
            Ok(())
        })
    }

    pub fn set_null(&self, cell: &CellId) -> Result<DisplayUpdate, EditError> {
        self.lock().apply(cell, |mounted, history| {
            if !mounted.spec.nullable {
                return Err(ValidationError::NotNullable {
                    column: mounted.spec.column.clone(),
                });
            }
            history.set_value(None);
            Ok(())
        })
    }

    pub fn undo(&self, cell: &CellId) -> Result<DisplayUpdate, EditError> {
        self.lock().apply(cell, |_, history| {
            history.undo();
            Ok(())
        })
    }

    pub fn redo(&self, cell: &CellId) -> Result<DisplayUpdate, EditError> {
        self.lock().apply(cell, |_, history| {
            history.redo();
            Ok(())
        })
    }

    /// Throw away the cell's edits and return it to its baseline.
    pub fn reset_cell(&self, cell: &CellId) -> Result<DisplayUpdate, EditError> {
        self.lock().apply(cell, |_, history| {
            history.reset(None);
            Ok(())
        })
    }

    pub fn pending_count(&self, target: &TargetId) -> usize {
        self.lock().controller.pending_count(target)
    }

    pub fn combined_script(&self, target: &TargetId) -> String {
        self.lock().controller.combined_script(target)
    }

    pub fn pending_statements(&self, target: &TargetId) -> Vec<(CellId, String)> {
        self.lock()
            .controller
            .batch(target)
            .map(|batch| batch.statements())
            .unwrap_or_default()
    }

    pub fn run_state(&self, target: &TargetId) -> RunState {
        self.lock().controller.run_state(target)
    }

    /// Submit the target's combined script once. On success every pending cell adopts its
    /// value as the new baseline; on failure the batch is left exactly as it was.
    pub async fn run(&self, target: &TargetId) -> Result<RunReport, RunError> {
        let ticket = self.lock().controller.begin_run(target)?;
        let result = self.executor.execute(&ticket.target, &ticket.script).await;

        let (outcome, refresh) = {
            let mut state = self.lock();
            let outcome = state.controller.finish_run(ticket, result);
            (outcome, state.refresh.clone())
        };
        let report = outcome?;
        if let Some(refresh) = refresh {
            refresh(&report.target);
        }
        Ok(report)
    }

    /// Abandon every pending edit for `target`; returns the reverted cells.
    pub fn discard(&self, target: &TargetId) -> Vec<DisplayUpdate> {
        let mut state = self.lock();
        let cleared = state.controller.discard(target);
        cleared
            .iter()
            .filter_map(|id| state.display(id))
            .collect()
    }
}
