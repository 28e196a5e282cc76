use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch::{ScriptBatch, Settle, SettleCallback};
use crate::error::{EditError, ExecError, RoutingError, RunError};
use crate::ids::{CommandId, TargetId};
use crate::limits::{enforce_script_size, EngineConfig};

/// Execution state of one target's batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Committed,
    Failed {
        message: String,
    },
}

/// Snapshot taken when a run starts; handed back to [`BatchController::finish_run`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunTicket {
    pub target: TargetId,
    pub script: String,
    pub statements: usize,
    generation: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub target: TargetId,
    pub script: String,
    pub statements: usize,
    /// Commands settled with [`Settle::Run`]; empty when the batch was discarded mid-run.
    pub settled: Vec<CommandId>,
}

#[derive(Debug)]
struct TargetSlot {
    batch: ScriptBatch,
    state: RunState,
    // Bumped on discard so a run that outlives its batch settles nothing.
    generation: u64,
}

/// Owns every target's batch and the "active target" used to route fresh edits.
#[derive(Debug)]
pub struct BatchController {
    active: Option<TargetId>,
    slots: HashMap<TargetId, TargetSlot>,
    config: EngineConfig,
}

impl Default for BatchController {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl BatchController {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            active: None,
            slots: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_active_target(&mut self, target: TargetId) {
        if self.active.as_ref() != Some(&target) {
            debug!(%target, "active target changed");
        }
        self.active = Some(target);
    }

    pub fn active_target(&self) -> Option<&TargetId> {
        self.active.as_ref()
    }

    pub fn batch(&self, target: &TargetId) -> Option<&ScriptBatch> {
        self.slots.get(target).map(|slot| &slot.batch)
    }

    pub fn run_state(&self, target: &TargetId) -> RunState {
        self.slots
            .get(target)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    pub fn is_running(&self, target: &TargetId) -> bool {
        self.slots
            .get(target)
            .is_some_and(|slot| slot.state == RunState::Running)
    }

    pub fn has_pending(&self, target: &TargetId, id: &CommandId) -> bool {
        self.batch(target).is_some_and(|batch| batch.contains(id))
    }

    pub fn pending_count(&self, target: &TargetId) -> usize {
        self.batch(target).map_or(0, ScriptBatch::len)
    }

    pub fn combined_script(&self, target: &TargetId) -> String {
        self.batch(target)
            .map(ScriptBatch::combined_script)
            .unwrap_or_default()
    }

    /// Check whether an edit for a cell of `target` may proceed.
    ///
    /// A target whose batch already holds pending statements keeps accepting edits; starting a
    /// fresh batch requires `target` to be the active target.
    pub fn check_route(&self, target: &TargetId) -> Result<(), RoutingError> {
        if self.is_running(target) {
            return Err(RoutingError::TargetRunning {
                target: target.clone(),
            });
        }
        if self.pending_count(target) > 0 {
            return Ok(());
        }
        match &self.active {
            None => Err(RoutingError::NoActiveTarget),
            Some(active) if active != target => Err(RoutingError::InactiveTarget {
                active: active.clone(),
                requested: target.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn upsert(
        &mut self,
        target: &TargetId,
        id: CommandId,
        statement: String,
        on_settle: SettleCallback,
    ) -> Result<(), EditError> {
        self.check_route(target)?;
        let max_commands = self.config.max_pending_commands;
        let slot = self
            .slots
            .entry(target.clone())
            .or_insert_with(|| TargetSlot {
                batch: ScriptBatch::for_target(target.clone()).with_limit(max_commands),
                state: RunState::Idle,
                generation: 0,
            });
        slot.batch.upsert(target, id, statement, on_settle)
    }

    pub fn remove(&mut self, target: &TargetId, id: &CommandId) -> bool {
        self.slots
            .get_mut(target)
            .is_some_and(|slot| slot.batch.remove(id))
    }

    /// Idle/Committed/Failed -> Running. The returned ticket carries the exact script to submit.
    pub fn begin_run(&mut self, target: &TargetId) -> Result<RunTicket, RunError> {
        let max_script_bytes = self.config.max_script_bytes;
        let slot = self
            .slots
            .get_mut(target)
            .filter(|slot| !slot.batch.is_empty())
            .ok_or_else(|| RunError::EmptyBatch(target.clone()))?;
        if slot.state == RunState::Running {
            return Err(RunError::AlreadyRunning(target.clone()));
        }

        let script = slot.batch.combined_script();
        enforce_script_size(&script, max_script_bytes)?;
        slot.state = RunState::Running;
        info!(
            %target,
            statements = slot.batch.len(),
            bytes = script.len(),
            "submitting pending changes"
        );
        Ok(RunTicket {
            target: target.clone(),
            statements: slot.batch.len(),
            script,
            generation: slot.generation,
        })
    }

    /// Running -> Committed (settle every command with `Run`) or Running -> Failed (batch kept).
    pub fn finish_run(
        &mut self,
        ticket: RunTicket,
        result: Result<(), ExecError>,
    ) -> Result<RunReport, RunError> {
        let RunTicket {
            target,
            script,
            statements,
            generation,
        } = ticket;
        let Some(slot) = self.slots.get_mut(&target) else {
            // Slots are never dropped; a missing one means the ticket is foreign.
            warn!(%target, "finished a run for an unknown target");
            return result
                .map(|()| RunReport {
                    target,
                    script,
                    statements,
                    settled: Vec::new(),
                })
                .map_err(RunError::from);
        };

        if slot.generation != generation {
            warn!(%target, "batch was discarded while its run was in flight");
            slot.state = RunState::Idle;
            return result
                .map(|()| RunReport {
                    target,
                    script,
                    statements,
                    settled: Vec::new(),
                })
                .map_err(RunError::from);
        }

        match result {
            Ok(()) => {
                let settled = slot.batch.settle_all(Settle::Run);
                slot.state = RunState::Committed;
                info!(%target, statements, "pending changes committed");
                Ok(RunReport {
                    target,
                    script,
                    statements,
                    settled,
                })
            }
            Err(err) => {
                warn!(%target, error = %err, "executing pending changes failed; batch kept for retry");
                slot.state = RunState::Failed {
                    message: err.message.clone(),
                };
                Err(RunError::Exec(err))
            }
        }
    }

    /// Settle every pending command with `Clear` and return the target to `Idle`.
    ///
    /// A run already in flight keeps the target `Running` until it reports back.
    pub fn discard(&mut self, target: &TargetId) -> Vec<CommandId> {
        let Some(slot) = self.slots.get_mut(target) else {
            return Vec::new();
        };
        let cleared = slot.batch.clear_all();
        slot.generation += 1;
        if slot.state != RunState::Running {
            slot.state = RunState::Idle;
        }
        debug!(%target, cleared = cleared.len(), "discarded pending changes");
        cleared
    }
}
