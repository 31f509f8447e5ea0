//! Coordinator behaviour against the scriptable mock backend.
//!
//! These tests pin down delivery, slot exclusivity, cancellation and timeouts
//! without a real database.

use sqldesk::config::ExecutionConfig;
use sqldesk::db::{ColumnInfo, ConnectionDescriptor, MockBackend, Value};
use sqldesk::query::{Coordinator, QueryEvent, QueryOutcome, SubmitError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const LONG: Duration = Duration::from_secs(30);

fn config(max_workers: usize) -> ExecutionConfig {
    ExecutionConfig {
        timeout_ms: 60_000,
        max_workers,
    }
}

fn target() -> ConnectionDescriptor {
    ConnectionDescriptor::file("/tmp/sqldesk-mock.db")
}

fn start(backend: MockBackend, max_workers: usize) -> (Coordinator, UnboundedReceiver<QueryEvent>) {
    Coordinator::new(Arc::new(backend), &config(max_workers)).unwrap()
}

async fn next_event(events: &mut UnboundedReceiver<QueryEvent>) -> QueryEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event within 5 seconds")
        .expect("event channel closed")
}

async fn assert_no_more_events(events: &mut UnboundedReceiver<QueryEvent>) {
    let extra = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(extra.is_err(), "unexpected extra event: {extra:?}");
}

#[tokio::test]
async fn test_select_delivers_rows() {
    let backend = MockBackend::new().with_rows(
        vec![ColumnInfo::new("id", "INTEGER"), ColumnInfo::new("name", "TEXT")],
        vec![
            vec![Value::Int(1), Value::from("a")],
            vec![Value::Int(2), Value::from("b")],
            vec![Value::Int(3), Value::from("c")],
        ],
    );
    let stats = backend.stats();
    let (coordinator, mut events) = start(backend, 2);
    let slot = coordinator.open_slot();

    let task = coordinator.submit(slot, target(), "SELECT * FROM t").unwrap();
    let event = next_event(&mut events).await;

    assert_eq!(event.slot, slot);
    assert_eq!(event.task, task);
    let result = event.outcome.result().expect("query should succeed");
    assert_eq!(result.row_count, 3);
    assert_eq!(result.column_names(), vec!["id", "name"]);
    assert!(event
        .outcome
        .status_line()
        .starts_with("Query executed successfully | Total rows: 3 | Time: "));

    assert_no_more_events(&mut events).await;
    assert_eq!(stats.connects(), 1);
    assert_eq!(stats.closes(), 1);
    assert!(!coordinator.is_busy(slot));
}

#[tokio::test]
async fn test_row_affecting_reports_count() {
    let (coordinator, mut events) = start(MockBackend::new().with_rows_affected(7), 2);
    let slot = coordinator.open_slot();

    coordinator
        .submit(slot, target(), "UPDATE t SET x = 1")
        .unwrap();
    let event = next_event(&mut events).await;

    assert!(event
        .outcome
        .status_line()
        .starts_with("Command executed successfully | Rows affected: 7 | Time: "));
}

#[tokio::test]
async fn test_each_submission_delivers_exactly_once() {
    let backend = MockBackend::new().with_execute_delay(Duration::from_millis(20));
    let stats = backend.stats();
    let (coordinator, mut events) = start(backend, 2);

    let mut expected = HashSet::new();
    for _ in 0..10 {
        let slot = coordinator.open_slot();
        let task = coordinator.submit(slot, target(), "SELECT 1").unwrap();
        expected.insert((slot, task));
    }

    let mut seen = HashSet::new();
    for _ in 0..10 {
        let event = next_event(&mut events).await;
        assert!(event.outcome.is_success(), "{:?}", event.outcome);
        assert!(seen.insert((event.slot, event.task)), "duplicate event");
    }
    assert_eq!(seen, expected);
    assert_no_more_events(&mut events).await;
    assert_eq!(stats.connects(), 10);
    assert_eq!(stats.closes(), 10);
}

#[tokio::test]
async fn test_busy_slot_rejects_and_other_slots_run() {
    let (coordinator, mut events) = start(MockBackend::new().with_execute_delay(LONG), 2);
    let busy = coordinator.open_slot();
    let other = coordinator.open_slot();

    coordinator.submit(busy, target(), "SELECT 1").unwrap();
    assert_eq!(
        coordinator.submit(busy, target(), "SELECT 2"),
        Err(SubmitError::SlotBusy(busy))
    );
    assert!(coordinator.submit(other, target(), "SELECT 3").is_ok());

    coordinator.cancel(busy);
    coordinator.cancel(other);
    for _ in 0..2 {
        let event = next_event(&mut events).await;
        assert!(matches!(event.outcome, QueryOutcome::Cancelled));
    }
    assert_no_more_events(&mut events).await;
}

#[tokio::test]
async fn test_cancel_shortly_after_submit() {
    let backend = MockBackend::new().with_execute_delay(LONG);
    let stats = backend.stats();
    let (coordinator, mut events) = start(backend, 2);
    let slot = coordinator.open_slot();

    coordinator.submit(slot, target(), "SELECT pg_sleep(30)").unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let cancelled_at = Instant::now();
    coordinator.cancel(slot);
    assert!(!coordinator.is_busy(slot));

    let event = next_event(&mut events).await;
    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    assert!(matches!(event.outcome, QueryOutcome::Cancelled));
    assert_eq!(event.outcome.status_line(), "Query cancelled by user.");
    assert_eq!(stats.executes_completed(), 0);
    assert_eq!(stats.closes(), stats.connects());
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let (coordinator, mut events) = start(MockBackend::new().with_execute_delay(LONG), 2);
    let slot = coordinator.open_slot();

    coordinator.submit(slot, target(), "SELECT 1").unwrap();
    coordinator.cancel(slot);
    coordinator.cancel(slot);
    coordinator.cancel(slot);

    let event = next_event(&mut events).await;
    assert!(matches!(event.outcome, QueryOutcome::Cancelled));
    assert_no_more_events(&mut events).await;
}

#[tokio::test]
async fn test_cancel_uninterruptible_statement() {
    let backend = MockBackend::new()
        .interruptible(false)
        .with_execute_delay(Duration::from_millis(300));
    let stats = backend.stats();
    let (coordinator, mut events) = start(backend, 2);
    let slot = coordinator.open_slot();

    coordinator.submit(slot, target(), "SELECT 1").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.cancel(slot);

    let event = next_event(&mut events).await;
    assert!(matches!(event.outcome, QueryOutcome::Cancelled));
    assert_eq!(stats.aborts(), 0);
    assert_eq!(stats.executes_completed(), 0);

    // The backend keeps running the statement; its late result is discarded
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(stats.executes_completed(), 1);
    assert_no_more_events(&mut events).await;
}

#[tokio::test]
async fn test_timeout_then_resubmit() {
    let backend = MockBackend::new().with_execute_delay(LONG);
    let stats = backend.stats();
    let (coordinator, mut events) = start(backend, 2);
    let slot = coordinator.open_slot();

    let first = coordinator
        .submit_with_timeout(slot, target(), "SELECT 1", Duration::from_millis(50))
        .unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(event.task, first);
    match event.outcome {
        QueryOutcome::TimedOut(after) => assert_eq!(after, Duration::from_millis(50)),
        other => panic!("Expected timeout, got {other:?}"),
    }
    assert!(!coordinator.is_busy(slot));
    assert!(stats.aborts() >= 1);

    let second = coordinator
        .submit_with_timeout(slot, target(), "SELECT 2", Duration::from_millis(50))
        .unwrap();
    assert_ne!(first, second);
    let event = next_event(&mut events).await;
    assert_eq!(event.task, second);
    assert!(matches!(event.outcome, QueryOutcome::TimedOut(_)));
    assert_no_more_events(&mut events).await;
}

#[tokio::test]
async fn test_timeout_status_line() {
    let (coordinator, mut events) = start(MockBackend::new().with_execute_delay(LONG), 2);
    let slot = coordinator.open_slot();

    coordinator
        .submit_with_timeout(slot, target(), "SELECT 1", Duration::from_secs(1))
        .unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(
        event.outcome.status_line(),
        "Error: Query timed out after 1 seconds."
    );
}

#[tokio::test]
async fn test_wrong_password_reports_connection_error() {
    let (coordinator, mut events) = start(MockBackend::new().with_password("right"), 2);
    let slot = coordinator.open_slot();
    let descriptor = ConnectionDescriptor::network("localhost", 5432, "app", "alice", "wrong");

    coordinator.submit(slot, descriptor, "SELECT 1").unwrap();
    let event = next_event(&mut events).await;

    match &event.outcome {
        QueryOutcome::Failed(message) => assert_eq!(
            message,
            "Authentication failed for user 'alice'. Check your credentials."
        ),
        other => panic!("Expected failure, got {other:?}"),
    }
    assert!(event.outcome.status_line().starts_with("Error: Authentication failed"));
}

#[tokio::test]
async fn test_incomplete_descriptor_fails_without_connecting() {
    let (coordinator, mut events) = start(MockBackend::new(), 2);
    let slot = coordinator.open_slot();
    let descriptor = ConnectionDescriptor::network("", 5432, "app", "alice", "pw");

    coordinator.submit(slot, descriptor, "SELECT 1").unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event.outcome, QueryOutcome::Failed(_)));
}

#[tokio::test]
async fn test_execution_error_is_reported() {
    let backend = MockBackend::new().failing_execute("relation \"missing\" does not exist");
    let stats = backend.stats();
    let (coordinator, mut events) = start(backend, 2);
    let slot = coordinator.open_slot();

    coordinator.submit(slot, target(), "SELECT * FROM missing").unwrap();
    let event = next_event(&mut events).await;

    assert_eq!(
        event.outcome.status_line(),
        "Error: relation \"missing\" does not exist"
    );
    assert_eq!(stats.closes(), 1);
}

#[tokio::test]
async fn test_cancel_while_queued_never_connects() {
    let backend = MockBackend::new().with_execute_delay(LONG);
    let stats = backend.stats();
    let (coordinator, mut events) = start(backend, 1);
    let running = coordinator.open_slot();
    let queued = coordinator.open_slot();

    coordinator.submit(running, target(), "SELECT 1").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.submit(queued, target(), "SELECT 2").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(stats.connects(), 1);

    coordinator.cancel(queued);
    let event = next_event(&mut events).await;
    assert_eq!(event.slot, queued);
    assert!(matches!(event.outcome, QueryOutcome::Cancelled));
    assert_eq!(stats.connects(), 1);

    coordinator.cancel(running);
    let event = next_event(&mut events).await;
    assert_eq!(event.slot, running);
    assert!(matches!(event.outcome, QueryOutcome::Cancelled));
}

#[tokio::test]
async fn test_cancel_during_connect() {
    let backend = MockBackend::new().with_connect_delay(LONG);
    let stats = backend.stats();
    let (coordinator, mut events) = start(backend, 2);
    let slot = coordinator.open_slot();

    coordinator.submit(slot, target(), "SELECT 1").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.cancel(slot);

    let event = next_event(&mut events).await;
    assert!(matches!(event.outcome, QueryOutcome::Cancelled));
    assert_eq!(stats.executes_started(), 0);
}

#[tokio::test]
async fn test_close_slot_cancels_running_task() {
    let (coordinator, mut events) = start(MockBackend::new().with_execute_delay(LONG), 2);
    let slot = coordinator.open_slot();

    coordinator.submit(slot, target(), "SELECT 1").unwrap();
    coordinator.close_slot(slot);

    let event = next_event(&mut events).await;
    assert_eq!(event.slot, slot);
    assert!(matches!(event.outcome, QueryOutcome::Cancelled));
}
