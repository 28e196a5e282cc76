//! Database side of rowdraft.
//!
//! Connections are described by JSON objects tagged with `kind` (`sqlite` or `postgres`).
//! [`SqlConnector`] binds them to engine targets and submits combined scripts via `sqlx`.

mod connector;
mod sql;

pub use connector::SqlConnector;
pub use sql::{
    column_metadata, execute_script, load_rows, ColumnMeta, LoadedRows, SqlDataType, SqlTarget,
};
