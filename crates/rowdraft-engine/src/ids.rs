use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a database connection that statements are executed against.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TargetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// Fixed namespace so the same cell maps to the same id across sessions.
const CELL_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a8e_93d4_4b57_a0e2_5c7d_19b3_f046);

/// Stable identity of an editable cell: `(target, table, column, row key)`.
///
/// Derived as a UUID v5, so re-mounting the same cell yields the same id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(Uuid);

impl CellId {
    pub fn derive(target: &TargetId, table: &str, column: &str, pk_value: &str) -> Self {
        let mut name = String::with_capacity(
            target.as_str().len() + table.len() + column.len() + pk_value.len() + 3,
        );
        for (idx, part) in [target.as_str(), table, column, pk_value].into_iter().enumerate() {
            if idx > 0 {
                // ASCII unit separator; keeps `("ab", "c")` distinct from `("a", "bc")`.
                name.push('\u{1f}');
            }
            name.push_str(part);
        }
        Self(Uuid::new_v5(&CELL_NAMESPACE, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Pending commands are keyed by the cell they originate from.
pub type CommandId = CellId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_ids_are_stable_and_unambiguous() {
        let target = TargetId::new("main");
        let a = CellId::derive(&target, "users", "name", "1");
        assert_eq!(a, CellId::derive(&target, "users", "name", "1"));
        assert_ne!(a, CellId::derive(&target, "users", "name", "2"));
        assert_ne!(
            CellId::derive(&target, "ab", "c", "1"),
            CellId::derive(&target, "a", "bc", "1")
        );
        assert_ne!(a, CellId::derive(&TargetId::new("replica"), "users", "name", "1"));
    }
}
