use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{anyhow, Context, Result};
use rowdraft_engine::{ExecError, ScriptExecutor, TargetId};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::sql::{ColumnMeta, LoadedRows, SqlTarget};

/// Maps targets to open connection pools and executes scripts against them.
#[derive(Debug, Default)]
pub struct SqlConnector {
    targets: RwLock<HashMap<TargetId, SqlTarget>>,
}

impl SqlConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `connection` and bind it to `target`, replacing any earlier registration.
    ///
    /// The pool lives until the target is unregistered or replaced, so an `inMemory` SQLite
    /// database keeps its tables across scripts.
    pub async fn register(
        &self,
        target: impl Into<TargetId>,
        connection: JsonValue,
        credentials: Option<JsonValue>,
    ) -> Result<()> {
        let target = target.into();
        let opened = SqlTarget::connect(&connection, credentials.as_ref())
            .await
            .with_context(|| format!("open connection for `{target}`"))?;
        debug!(%target, "registered connection");
        let previous = self
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, opened);
        if let Some(previous) = previous {
            previous.close().await;
        }
        Ok(())
    }

    pub async fn unregister(&self, target: &TargetId) -> bool {
        let removed = self
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
        match removed {
            Some(opened) => {
                opened.close().await;
                true
            }
            None => false,
        }
    }

    fn lookup(&self, target: &TargetId) -> Result<SqlTarget> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
            .ok_or_else(|| anyhow!("no connection registered for `{target}`"))
    }

    pub async fn column_metadata(&self, target: &TargetId, table: &str) -> Result<Vec<ColumnMeta>> {
        self.lookup(target)?.column_metadata(table).await
    }

    pub async fn load_rows(&self, target: &TargetId, sql: &str) -> Result<LoadedRows> {
        self.lookup(target)?.load_rows(sql).await
    }
}

impl ScriptExecutor for SqlConnector {
    async fn execute(&self, target: &TargetId, script: &str) -> Result<(), ExecError> {
        let result = match self.lookup(target) {
            Ok(opened) => opened.execute_script(script).await,
            Err(err) => Err(err),
        };
        result.map_err(|err| {
            let message = format!("{err:#}");
            warn!(%target, error = %message, "script execution failed");
            ExecError::new(message)
        })
    }
}
