//! Engine limits and their configuration.
//!
//! Edits arrive from an untrusted UI layer; a runaway paste or a stuck batch should fail with a
//! clear message rather than grow without bound.

use serde::{Deserialize, Serialize};

use crate::error::{RunError, ValidationError};

/// Maximum number of pending statements a single target's batch may hold.
pub const MAX_PENDING_COMMANDS: usize = 10_000;

/// Maximum size (in bytes) of a combined script submitted in one run.
pub const MAX_SCRIPT_BYTES: usize = 8 * 1024 * 1024; // 8MB

/// Maximum size (in bytes) of the text entered into a single cell.
pub const MAX_CELL_TEXT_BYTES: usize = 1_000_000; // ~1MB

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub max_pending_commands: usize,
    pub max_script_bytes: usize,
    pub max_cell_text_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pending_commands: MAX_PENDING_COMMANDS,
            max_script_bytes: MAX_SCRIPT_BYTES,
            max_cell_text_bytes: MAX_CELL_TEXT_BYTES,
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON config; missing fields keep their defaults.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

pub fn enforce_cell_text_size(text: &str, limit: usize) -> Result<(), ValidationError> {
    if text.len() > limit {
        return Err(ValidationError::TooLarge {
            bytes: text.len(),
            limit,
        });
    }
    Ok(())
}

pub fn enforce_script_size(script: &str, limit: usize) -> Result<(), RunError> {
    if script.len() > limit {
        return Err(RunError::ScriptTooLarge {
            bytes: script.len(),
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_config_keeps_defaults() {
        let config = EngineConfig::from_json(json!({ "maxScriptBytes": 64 })).unwrap();
        assert_eq!(config.max_script_bytes, 64);
        assert_eq!(config.max_pending_commands, MAX_PENDING_COMMANDS);
        assert_eq!(config.max_cell_text_bytes, MAX_CELL_TEXT_BYTES);
    }

    #[test]
    fn enforce_script_size_rejects_oversized_scripts() {
        let script = "x".repeat(65);
        let err = enforce_script_size(&script, 64).expect_err("expected size check to fail");
        assert!(
            err.to_string().contains("max 64"),
            "expected error message to mention limit: {err}"
        );
        assert!(enforce_script_size("x", 64).is_ok());
    }

    #[test]
    fn enforce_cell_text_size_reports_bytes() {
        let err = enforce_cell_text_size("abcd", 3).expect_err("expected size check to fail");
        assert_eq!(err, ValidationError::TooLarge { bytes: 4, limit: 3 });
    }
}
