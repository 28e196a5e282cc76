use std::sync::Arc;

use pretty_assertions::assert_eq;
use rowdraft_engine::{EditSession, RunError, RunState, ScriptExecutor, TargetId};
use rowdraft_model::RawValue;
use rowdraft_sql::{execute_script, ColumnMeta, SqlConnector, SqlDataType};
use serde_json::{json, Value as JsonValue};

const SCHEMA: &str = "CREATE TABLE t (id INTEGER PRIMARY KEY, n INTEGER NOT NULL, flag BOOLEAN, note TEXT);\n\
INSERT INTO t VALUES (1, 5, 1, 'hi'), (2, 7, 0, NULL);";

fn sqlite_db(dir: &tempfile::TempDir) -> JsonValue {
    let path = dir.path().join("grid.db");
    std::fs::File::create(&path).unwrap();
    json!({ "kind": "sqlite", "path": path.to_string_lossy() })
}

fn meta<'a>(metas: &'a [ColumnMeta], name: &str) -> &'a ColumnMeta {
    metas
        .iter()
        .find(|meta| meta.name == name)
        .unwrap_or_else(|| panic!("missing column {name}"))
}

#[tokio::test]
async fn committed_edits_land_in_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let connection = sqlite_db(&dir);
    execute_script(&connection, SCHEMA, None).await.unwrap();

    let connector = SqlConnector::new();
    connector.register("main", connection, None).await.unwrap();
    let target = TargetId::new("main");

    let metas = connector.column_metadata(&target, "t").await.unwrap();
    let names: Vec<_> = metas.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["id", "n", "flag", "note"]);
    assert_eq!(meta(&metas, "n").data_type, SqlDataType::Number);
    assert!(!meta(&metas, "n").nullable);
    assert_eq!(meta(&metas, "flag").data_type, SqlDataType::Boolean);
    assert!(meta(&metas, "note").nullable);

    let loaded = connector
        .load_rows(&target, "SELECT id, n, flag, note FROM t ORDER BY id")
        .await
        .unwrap();
    assert_eq!(
        loaded.rows[0],
        vec![
            RawValue::from(1i64),
            RawValue::from(5i64),
            RawValue::Bool(true),
            RawValue::from("hi"),
        ]
    );
    assert_eq!(loaded.rows[1][3], RawValue::Null);

    let session = EditSession::new(connector);
    session.set_active_target("main");
    let mut ids = Vec::new();
    for (row, pk) in [(0usize, "1"), (1, "2")] {
        for column in ["n", "flag", "note"] {
            let idx = loaded.column_index(column).unwrap();
            let spec = meta(&metas, column).cell_spec(&target, "t", "id", pk);
            ids.push(spec.cell_id());
            session.mount_cell(spec, &loaded.rows[row][idx]);
        }
    }
    let (n1, flag1, note1, note2) = (ids[0], ids[1], ids[2], ids[5]);

    session.edit_cell(&n1, "6").unwrap();
    session.edit_cell(&flag1, "false").unwrap();
    session.edit_cell(&note1, "it's").unwrap();
    session.edit_cell(&note2, "x").unwrap();
    let rejected = session.set_null(&n1).unwrap();
    assert!(rejected.rejected.is_some());
    assert_eq!(session.pending_count(&target), 4);

    let report = session.run(&target).await.unwrap();
    assert_eq!(report.settled, vec![n1, flag1, note1, note2]);
    assert_eq!(session.run_state(&target), RunState::Committed);
    assert!(!session.display(&note1).unwrap().dirty);

    let reloaded = session
        .executor()
        .load_rows(&target, "SELECT n, flag, note FROM t ORDER BY id")
        .await
        .unwrap();
    assert_eq!(
        reloaded.rows,
        vec![
            vec![
                RawValue::from(6i64),
                RawValue::Bool(false),
                RawValue::from("it's"),
            ],
            vec![
                RawValue::from(7i64),
                RawValue::Bool(false),
                RawValue::from("x"),
            ],
        ]
    );
}

#[tokio::test]
async fn failed_run_keeps_pending_changes_until_retry() {
    let dir = tempfile::tempdir().unwrap();
    let connection = sqlite_db(&dir);

    let connector = SqlConnector::new();
    connector
        .register("main", connection.clone(), None)
        .await
        .unwrap();
    let target = TargetId::new("main");

    let session = EditSession::new(connector);
    session.set_active_target("main");
    let spec = ColumnMeta {
        name: "n".to_string(),
        data_type: SqlDataType::Number,
        nullable: false,
    }
    .cell_spec(&target, "t", "id", "1");
    let id = spec.cell_id();
    session.mount_cell(spec, &RawValue::from(5i64));
    session.edit_cell(&id, "9").unwrap();
    let script = session.combined_script(&target);

    let err = session.run(&target).await.unwrap_err();
    let exec = match err {
        RunError::Exec(exec) => exec,
        other => panic!("expected execution failure, got {other:?}"),
    };
    assert!(exec.message.contains("no such table"), "{}", exec.message);
    assert!(matches!(session.run_state(&target), RunState::Failed { .. }));
    assert_eq!(session.pending_count(&target), 1);
    assert_eq!(session.combined_script(&target), script);

    execute_script(&connection, SCHEMA, None).await.unwrap();
    session.run(&target).await.unwrap();
    assert_eq!(session.pending_count(&target), 0);

    let rows = session
        .executor()
        .load_rows(&target, "SELECT n FROM t WHERE id = 1")
        .await
        .unwrap();
    assert_eq!(rows.rows, vec![vec![RawValue::from(9i64)]]);
}

#[tokio::test]
async fn unknown_targets_and_kinds_fail_with_clear_messages() {
    let connector = SqlConnector::new();
    let err = connector
        .execute(&TargetId::new("nowhere"), "SELECT 1;")
        .await
        .unwrap_err();
    assert!(err.message.contains("no connection registered"), "{err}");

    let err = connector
        .register("legacy", json!({ "kind": "mysql" }), None)
        .await
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("open connection for `legacy`"), "{message}");
    assert!(
        message.contains("Unsupported SQL connection kind 'mysql'"),
        "{message}"
    );
    assert!(!connector.unregister(&TargetId::new("legacy")).await);

    connector
        .register("scratch", json!({ "kind": "sqlite", "inMemory": true }), None)
        .await
        .unwrap();
    assert!(connector.unregister(&TargetId::new("scratch")).await);
    assert!(!connector.unregister(&TargetId::new("scratch")).await);
}

#[tokio::test]
async fn in_memory_target_keeps_its_tables_between_runs() {
    let connector = SqlConnector::new();
    connector
        .register("scratch", json!({ "kind": "sqlite", "inMemory": true }), None)
        .await
        .unwrap();
    let target = TargetId::new("scratch");
    connector.execute(&target, SCHEMA).await.unwrap();

    let metas = connector.column_metadata(&target, "t").await.unwrap();
    let session = EditSession::new(connector);
    session.set_active_target("scratch");
    let spec = meta(&metas, "note").cell_spec(&target, "t", "id", "2");
    let id = spec.cell_id();
    session.mount_cell(spec, &RawValue::Null);
    session.edit_cell(&id, "kept").unwrap();

    session.run(&target).await.unwrap();
    assert_eq!(session.run_state(&target), RunState::Committed);

    let rows = session
        .executor()
        .load_rows(&target, "SELECT note FROM t ORDER BY id")
        .await
        .unwrap();
    assert_eq!(
        rows.rows,
        vec![vec![RawValue::from("hi")], vec![RawValue::from("kept")]]
    );
}

#[tokio::test]
async fn script_execution_runs_on_spawned_tasks() {
    let connector = Arc::new(SqlConnector::new());
    connector
        .register("scratch", json!({ "kind": "sqlite", "inMemory": true }), None)
        .await
        .unwrap();

    let task = tokio::spawn({
        let connector = Arc::clone(&connector);
        async move {
            connector
                .execute(&TargetId::new("scratch"), SCHEMA)
                .await
        }
    });
    task.await.unwrap().unwrap();

    let rows = connector
        .load_rows(&TargetId::new("scratch"), "SELECT COUNT(*) AS n FROM t")
        .await
        .unwrap();
    assert_eq!(rows.rows, vec![vec![RawValue::from(2i64)]]);
}
