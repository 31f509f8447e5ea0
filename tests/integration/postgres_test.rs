//! PostgreSQL integration tests.
//!
//! These run only when DATABASE_URL points at a reachable server.

use sqldesk::config::ExecutionConfig;
use sqldesk::db::{self, ConnectionDescriptor, SqlxBackend};
use sqldesk::query::{Coordinator, QueryEvent, QueryOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

/// Helper to get the test descriptor from the environment.
fn test_descriptor() -> Option<ConnectionDescriptor> {
    let url = std::env::var("DATABASE_URL").ok()?;
    ConnectionDescriptor::from_connection_string(&url).ok()
}

fn start() -> (Coordinator, UnboundedReceiver<QueryEvent>) {
    let config = ExecutionConfig {
        timeout_ms: 60_000,
        max_workers: 4,
    };
    Coordinator::new(Arc::new(SqlxBackend), &config).unwrap()
}

async fn next_event(events: &mut UnboundedReceiver<QueryEvent>) -> QueryEvent {
    tokio::time::timeout(Duration::from_secs(15), events.recv())
        .await
        .expect("no event within 15 seconds")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_select_through_coordinator() {
    let Some(descriptor) = test_descriptor() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let (coordinator, mut events) = start();
    let slot = coordinator.open_slot();

    coordinator
        .submit(
            slot,
            descriptor,
            "SELECT g AS n, 'row ' || g AS label FROM generate_series(1, 3) AS g",
        )
        .unwrap();
    let event = next_event(&mut events).await;

    let result = event.outcome.result().expect("select should succeed");
    assert_eq!(result.row_count, 3);
    assert_eq!(result.column_names(), vec!["n", "label"]);
}

#[tokio::test]
async fn test_cancel_pg_sleep() {
    let Some(descriptor) = test_descriptor() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let (coordinator, mut events) = start();
    let slot = coordinator.open_slot();

    coordinator
        .submit(slot, descriptor.clone(), "SELECT pg_sleep(31)")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let cancelled_at = Instant::now();
    coordinator.cancel(slot);
    let event = next_event(&mut events).await;
    assert!(matches!(event.outcome, QueryOutcome::Cancelled));
    assert!(cancelled_at.elapsed() < Duration::from_secs(5));

    // The server is left with no statement from us still running
    tokio::time::sleep(Duration::from_millis(200)).await;
    coordinator
        .submit(
            slot,
            descriptor,
            "SELECT count(*) FROM pg_stat_activity WHERE query = 'SELECT pg_sleep(31)' AND state = 'active'",
        )
        .unwrap();
    let event = next_event(&mut events).await;
    let result = event.outcome.result().expect("activity query should succeed");
    assert_eq!(result.rows[0][0].to_display_string(), "0");
}

#[tokio::test]
async fn test_timeout_pg_sleep() {
    let Some(descriptor) = test_descriptor() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let (coordinator, mut events) = start();
    let slot = coordinator.open_slot();

    coordinator
        .submit_with_timeout(slot, descriptor, "SELECT pg_sleep(30)", Duration::from_secs(1))
        .unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(
        event.outcome.status_line(),
        "Error: Query timed out after 1 seconds."
    );
}

#[tokio::test]
async fn test_wrong_password_is_reported() {
    let Some(descriptor) = test_descriptor() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let ConnectionDescriptor::Network {
        host,
        port,
        database,
        user,
        ..
    } = descriptor
    else {
        eprintln!("Skipping test: DATABASE_URL is not a network connection");
        return;
    };
    let wrong = ConnectionDescriptor::network(host, port, database, user, "definitely-wrong");
    let (coordinator, mut events) = start();
    let slot = coordinator.open_slot();

    coordinator.submit(slot, wrong, "SELECT 1").unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event.outcome, QueryOutcome::Failed(_)));
}

#[tokio::test]
async fn test_list_tables_includes_created_table() {
    let Some(descriptor) = test_descriptor() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let mut client = db::connect(&descriptor).await.unwrap();
    client
        .execute(
            "CREATE TABLE IF NOT EXISTS sqldesk_listing_probe (id INTEGER)",
            db::StatementKind::RowAffecting,
        )
        .await
        .unwrap();

    let tables = client.list_tables().await.unwrap();
    assert!(tables.iter().any(|t| t.name == "sqldesk_listing_probe"));

    client
        .execute(
            "DROP TABLE sqldesk_listing_probe",
            db::StatementKind::RowAffecting,
        )
        .await
        .unwrap();
    client.close().await.unwrap();
}
