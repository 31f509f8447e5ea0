//! End-to-end tests against real SQLite files through the coordinator.

use sqldesk::config::ExecutionConfig;
use sqldesk::db::schema::{preview_sql, PreviewEnd};
use sqldesk::db::{self, ConnectionDescriptor, SqlxBackend, TableKind, Value};
use sqldesk::error::SqldeskError;
use sqldesk::query::{Coordinator, QueryEvent, QueryOutcome, SlotId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const SLOW_QUERY: &str = "SELECT count(*) FROM (WITH RECURSIVE c(x) AS \
     (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500000000) SELECT x FROM c)";

fn start() -> (Coordinator, UnboundedReceiver<QueryEvent>) {
    let config = ExecutionConfig {
        timeout_ms: 60_000,
        max_workers: 4,
    };
    Coordinator::new(Arc::new(SqlxBackend), &config).unwrap()
}

async fn run(
    coordinator: &Coordinator,
    events: &mut UnboundedReceiver<QueryEvent>,
    slot: SlotId,
    path: &Path,
    sql: &str,
) -> QueryOutcome {
    coordinator
        .submit(slot, ConnectionDescriptor::file(path), sql)
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("no event within 10 seconds")
        .expect("event channel closed")
        .outcome
}

/// Creates a database with a three-row `users` table.
async fn seeded_db(
    coordinator: &Coordinator,
    events: &mut UnboundedReceiver<QueryEvent>,
) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    std::fs::File::create(&path).unwrap();

    let slot = coordinator.open_slot();
    for sql in [
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL)",
        "INSERT INTO users (name, score) VALUES ('alice', 9.5), ('bob', NULL), ('carol', 7.0)",
    ] {
        let outcome = run(coordinator, events, slot, &path, sql).await;
        assert!(outcome.is_success(), "{sql}: {outcome:?}");
    }
    (dir, path)
}

#[tokio::test]
async fn test_select_returns_all_rows() {
    let (coordinator, mut events) = start();
    let (_dir, path) = seeded_db(&coordinator, &mut events).await;
    let slot = coordinator.open_slot();

    let outcome = run(
        &coordinator,
        &mut events,
        slot,
        &path,
        "SELECT id, name, score FROM users ORDER BY id",
    )
    .await;

    let result = outcome.result().expect("select should succeed");
    assert_eq!(result.row_count, 3);
    assert_eq!(result.column_names(), vec!["id", "name", "score"]);
    assert_eq!(
        result.rows[0],
        vec![Value::Int(1), Value::from("alice"), Value::Float(9.5)]
    );
    assert_eq!(result.rows[1][2], Value::Null);
}

#[tokio::test]
async fn test_update_reports_affected_rows() {
    let (coordinator, mut events) = start();
    let (_dir, path) = seeded_db(&coordinator, &mut events).await;
    let slot = coordinator.open_slot();

    let outcome = run(
        &coordinator,
        &mut events,
        slot,
        &path,
        "UPDATE users SET score = 0 WHERE score IS NOT NULL",
    )
    .await;
    assert!(outcome
        .status_line()
        .starts_with("Command executed successfully | Rows affected: 2 | Time: "));

    // Committed: a fresh connection sees the change
    let outcome = run(
        &coordinator,
        &mut events,
        slot,
        &path,
        "SELECT count(*) FROM users WHERE score = 0",
    )
    .await;
    assert_eq!(outcome.result().unwrap().rows[0][0], Value::Int(2));
}

#[tokio::test]
async fn test_syntax_error_is_reported() {
    let (coordinator, mut events) = start();
    let (_dir, path) = seeded_db(&coordinator, &mut events).await;
    let slot = coordinator.open_slot();

    let outcome = run(&coordinator, &mut events, slot, &path, "SELECT * FROM nowhere").await;
    match outcome {
        QueryOutcome::Failed(message) => assert!(message.contains("nowhere"), "{message}"),
        other => panic!("Expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_file_is_connection_error() {
    let (coordinator, mut events) = start();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.db");
    let slot = coordinator.open_slot();

    let outcome = run(&coordinator, &mut events, slot, &path, "SELECT 1").await;
    assert!(matches!(outcome, QueryOutcome::Failed(_)));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_cancel_interrupts_long_query() {
    let (coordinator, mut events) = start();
    let (_dir, path) = seeded_db(&coordinator, &mut events).await;
    let slot = coordinator.open_slot();

    coordinator
        .submit(slot, ConnectionDescriptor::file(&path), SLOW_QUERY)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let cancelled_at = Instant::now();
    coordinator.cancel(slot);
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(event.outcome, QueryOutcome::Cancelled));
    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_timeout_interrupts_long_query() {
    let (coordinator, mut events) = start();
    let (_dir, path) = seeded_db(&coordinator, &mut events).await;
    let slot = coordinator.open_slot();

    coordinator
        .submit_with_timeout(
            slot,
            ConnectionDescriptor::file(&path),
            SLOW_QUERY,
            Duration::from_millis(300),
        )
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(event.outcome, QueryOutcome::TimedOut(_)));

    // The slot is free again right away
    let outcome = run(&coordinator, &mut events, slot, &path, "SELECT 1").await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_preview_first_and_last_rows() {
    let (coordinator, mut events) = start();
    let (_dir, path) = seeded_db(&coordinator, &mut events).await;
    let slot = coordinator.open_slot();
    let kind = ConnectionDescriptor::file(&path).kind();

    let first = preview_sql(kind, "users", 2, PreviewEnd::First);
    let outcome = run(&coordinator, &mut events, slot, &path, &first).await;
    let names: Vec<Value> = outcome.result().unwrap().rows.iter().map(|r| r[1].clone()).collect();
    assert_eq!(names, vec![Value::from("alice"), Value::from("bob")]);

    let last = preview_sql(kind, "users", 2, PreviewEnd::Last);
    let outcome = run(&coordinator, &mut events, slot, &path, &last).await;
    let result = outcome.result().unwrap();
    assert_eq!(result.column_names(), vec!["id", "name", "score"]);
    let names: Vec<Value> = result.rows.iter().map(|r| r[1].clone()).collect();
    assert_eq!(names, vec![Value::from("bob"), Value::from("carol")]);
}

#[tokio::test]
async fn test_list_tables_on_file() {
    let (coordinator, mut events) = start();
    let (_dir, path) = seeded_db(&coordinator, &mut events).await;

    let mut client = db::connect(&ConnectionDescriptor::file(&path)).await.unwrap();
    let tables = client.list_tables().await.unwrap();
    client.close().await.unwrap();

    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "users");
    assert_eq!(tables[0].kind, TableKind::Table);
}

#[tokio::test]
async fn test_connection_check_on_existing_and_missing_files() {
    let (coordinator, mut events) = start();
    let (dir, path) = seeded_db(&coordinator, &mut events).await;

    db::test_connection(&ConnectionDescriptor::file(&path))
        .await
        .unwrap();

    let absent = dir.path().join("absent.db");
    let err = db::test_connection(&ConnectionDescriptor::file(&absent))
        .await
        .unwrap_err();
    assert!(matches!(err, SqldeskError::Connection(_)));
    assert!(err.message().contains("absent.db"), "{err}");
    assert!(!absent.exists());
}

#[tokio::test]
async fn test_created_database_accepts_queries() {
    let (coordinator, mut events) = start();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.db");

    db::create_sqlite_database(&path).await.unwrap();
    db::test_connection(&ConnectionDescriptor::file(&path))
        .await
        .unwrap();

    let slot = coordinator.open_slot();
    let outcome = run(&coordinator, &mut events, slot, &path, "CREATE TABLE t (a INTEGER)").await;
    assert!(outcome.is_success(), "{outcome:?}");
    let outcome = run(&coordinator, &mut events, slot, &path, "SELECT count(*) FROM t").await;
    assert_eq!(outcome.result().unwrap().rows[0][0], Value::Int(0));
}
