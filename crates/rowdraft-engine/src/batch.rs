use std::fmt;

use crate::error::{EditError, RoutingError};
use crate::ids::{CommandId, TargetId};
use crate::limits::MAX_PENDING_COMMANDS;

/// How a pending command was resolved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Settle {
    /// The batch executed; the cell adopts its pending value as the new baseline.
    Run,
    /// The batch was discarded; the cell reverts to its baseline.
    Clear,
}

/// Invoked exactly once when a pending command settles. Replaced commands drop their
/// callback without invoking it.
pub type SettleCallback = Box<dyn FnOnce(Settle) + Send>;

pub struct PendingCommand {
    pub id: CommandId,
    pub statement: String,
    on_settle: SettleCallback,
}

impl PendingCommand {
    pub fn new(id: CommandId, statement: String, on_settle: SettleCallback) -> Self {
        Self {
            id,
            statement,
            on_settle,
        }
    }

    pub fn settle(self, settle: Settle) {
        (self.on_settle)(settle)
    }
}

impl fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommand")
            .field("id", &self.id)
            .field("statement", &self.statement)
            .finish_non_exhaustive()
    }
}

/// Ordered pending statements for one target.
///
/// Commands keep the position of their first insertion when they are replaced, so the
/// combined script reads in the order cells were first edited.
#[derive(Debug)]
pub struct ScriptBatch {
    target_id: Option<TargetId>,
    commands: Vec<PendingCommand>,
    max_commands: usize,
}

impl Default for ScriptBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBatch {
    /// An unbound batch; it rejects every upsert until bound to a target.
    pub fn new() -> Self {
        Self {
            target_id: None,
            commands: Vec::new(),
            max_commands: MAX_PENDING_COMMANDS,
        }
    }

    pub fn for_target(target: TargetId) -> Self {
        Self {
            target_id: Some(target),
            ..Self::new()
        }
    }

    pub fn with_limit(mut self, max_commands: usize) -> Self {
        self.max_commands = max_commands;
        self
    }

    pub fn target_id(&self) -> Option<&TargetId> {
        self.target_id.as_ref()
    }

    pub fn upsert(
        &mut self,
        target: &TargetId,
        id: CommandId,
        statement: String,
        on_settle: SettleCallback,
    ) -> Result<(), EditError> {
        match &self.target_id {
            None => return Err(RoutingError::NoActiveTarget.into()),
            Some(bound) if bound != target => {
                return Err(RoutingError::TargetMismatch {
                    batch: bound.clone(),
                    requested: target.clone(),
                }
                .into())
            }
            Some(_) => {}
        }

        if let Some(existing) = self.commands.iter_mut().find(|cmd| cmd.id == id) {
            *existing = PendingCommand::new(id, statement, on_settle);
            return Ok(());
        }

        if self.commands.len() >= self.max_commands {
            return Err(EditError::BatchFull {
                limit: self.max_commands,
            });
        }
        self.commands
            .push(PendingCommand::new(id, statement, on_settle));
        Ok(())
    }

    /// Drop the command for `id` without settling it. Returns whether one existed.
    pub fn remove(&mut self, id: &CommandId) -> bool {
        let before = self.commands.len();
        self.commands.retain(|cmd| cmd.id != *id);
        self.commands.len() != before
    }

    /// Settle every command with `settle` (in insertion order) and empty the batch.
    pub fn settle_all(&mut self, settle: Settle) -> Vec<CommandId> {
        let commands = std::mem::take(&mut self.commands);
        let mut settled = Vec::with_capacity(commands.len());
        for command in commands {
            settled.push(command.id);
            command.settle(settle);
        }
        settled
    }

    pub fn clear_all(&mut self) -> Vec<CommandId> {
        self.settle_all(Settle::Clear)
    }

    pub fn combined_script(&self) -> String {
        self.commands
            .iter()
            .map(|cmd| cmd.statement.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn statements(&self) -> Vec<(CommandId, String)> {
        self.commands
            .iter()
            .map(|cmd| (cmd.id, cmd.statement.clone()))
            .collect()
    }

    pub fn statement(&self, id: &CommandId) -> Option<&str> {
        self.commands
            .iter()
            .find(|cmd| cmd.id == *id)
            .map(|cmd| cmd.statement.as_str())
    }

    pub fn contains(&self, id: &CommandId) -> bool {
        self.commands.iter().any(|cmd| cmd.id == *id)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CellId;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<(u8, Settle)>>>, impl Fn(u8) -> SettleCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: u8| -> SettleCallback {
            let sink = sink.clone();
            Box::new(move |settle: Settle| sink.lock().unwrap().push((tag, settle)))
        };
        (log, make)
    }

    fn id(row: &str) -> CommandId {
        CellId::derive(&TargetId::new("db"), "t", "n", row)
    }

    #[test]
    fn upsert_replaces_in_place() {
        let target = TargetId::new("db");
        let (_, cb) = recorder();
        let mut batch = ScriptBatch::for_target(target.clone());
        batch.upsert(&target, id("1"), "A1;".into(), cb(1)).unwrap();
        batch.upsert(&target, id("2"), "B1;".into(), cb(2)).unwrap();
        batch.upsert(&target, id("1"), "A2;".into(), cb(1)).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.combined_script(), "A2;\nB1;");
    }

    #[test]
    fn upsert_rejects_unbound_and_foreign_targets() {
        let (_, cb) = recorder();
        let mut unbound = ScriptBatch::new();
        let err = unbound
            .upsert(&TargetId::new("db"), id("1"), "x;".into(), cb(1))
            .unwrap_err();
        assert!(matches!(err, EditError::Routing(RoutingError::NoActiveTarget)));

        let mut batch = ScriptBatch::for_target(TargetId::new("db"));
        let err = batch
            .upsert(&TargetId::new("other"), id("1"), "x;".into(), cb(1))
            .unwrap_err();
        assert!(matches!(
            err,
            EditError::Routing(RoutingError::TargetMismatch { .. })
        ));
        assert!(batch.is_empty());
    }

    #[test]
    fn remove_is_idempotent_and_does_not_settle() {
        let target = TargetId::new("db");
        let (log, cb) = recorder();
        let mut batch = ScriptBatch::for_target(target.clone());
        batch.upsert(&target, id("1"), "A;".into(), cb(1)).unwrap();

        assert!(batch.remove(&id("1")));
        assert!(!batch.remove(&id("1")));
        assert!(batch.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn clear_all_settles_every_command_once() {
        let target = TargetId::new("db");
        let (log, cb) = recorder();
        let mut batch = ScriptBatch::for_target(target.clone());
        batch.upsert(&target, id("1"), "A;".into(), cb(1)).unwrap();
        batch.upsert(&target, id("2"), "B;".into(), cb(2)).unwrap();

        assert_eq!(batch.clear_all(), vec![id("1"), id("2")]);
        assert!(batch.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec![(1, Settle::Clear), (2, Settle::Clear)]
        );
        assert_eq!(batch.combined_script(), "");
    }

    #[test]
    fn batch_limit_applies_to_new_commands_only() {
        let target = TargetId::new("db");
        let (_, cb) = recorder();
        let mut batch = ScriptBatch::for_target(target.clone()).with_limit(1);
        batch.upsert(&target, id("1"), "A;".into(), cb(1)).unwrap();
        batch.upsert(&target, id("1"), "A2;".into(), cb(1)).unwrap();
        let err = batch
            .upsert(&target, id("2"), "B;".into(), cb(2))
            .unwrap_err();
        assert!(matches!(err, EditError::BatchFull { limit: 1 }));
    }
}
