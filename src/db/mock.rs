//! Mock database backend for testing.
//!
//! Provides a scriptable in-memory backend for headless testing of the query
//! task and coordinator: configurable delays, failures, interrupt support and
//! counters for every call the task makes.

use super::{
    AbortHandle, Backend, ColumnInfo, ConnectionDescriptor, DatabaseClient, Execution, Interrupt,
    Row, RowSet, StatementKind, TableEntry,
};
use crate::error::{Result, SqldeskError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Call counters shared between a [`MockBackend`] and its clients.
#[derive(Debug, Default)]
pub struct MockStats {
    connects: AtomicUsize,
    executes_started: AtomicUsize,
    executes_completed: AtomicUsize,
    aborts: AtomicUsize,
    closes: AtomicUsize,
}

impl MockStats {
    /// Number of times `connect` was invoked.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of statements that started executing.
    pub fn executes_started(&self) -> usize {
        self.executes_started.load(Ordering::SeqCst)
    }

    /// Number of statements that ran to completion inside the backend.
    pub fn executes_completed(&self) -> usize {
        self.executes_completed.load(Ordering::SeqCst)
    }

    /// Number of abort requests delivered to the backend.
    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Number of connections closed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// A backend whose behaviour is fixed up front by the test.
#[derive(Debug, Clone)]
pub struct MockBackend {
    connect_delay: Duration,
    execute_delay: Duration,
    connect_error: Option<SqldeskError>,
    execute_error: Option<SqldeskError>,
    expected_password: Option<String>,
    interruptible: bool,
    panic_on_execute: bool,
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
    rows_affected: u64,
    tables: Vec<TableEntry>,
    stats: Arc<MockStats>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates a backend that connects and executes instantly and returns an
    /// empty result set.
    pub fn new() -> Self {
        Self {
            connect_delay: Duration::ZERO,
            execute_delay: Duration::ZERO,
            connect_error: None,
            execute_error: None,
            expected_password: None,
            interruptible: true,
            panic_on_execute: false,
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
            tables: Vec::new(),
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    /// Makes every connect fail with a connection error.
    pub fn failing_connect(mut self, message: impl Into<String>) -> Self {
        self.connect_error = Some(SqldeskError::connection(message));
        self
    }

    /// Makes every statement fail with an execution error after its delay.
    pub fn failing_execute(mut self, message: impl Into<String>) -> Self {
        self.execute_error = Some(SqldeskError::query(message));
        self
    }

    /// Makes every statement come back aborted by the backend, as when another
    /// session cancels it.
    pub fn aborted_execute(mut self, message: impl Into<String>) -> Self {
        self.execute_error = Some(SqldeskError::aborted(message));
        self
    }

    /// Rejects network descriptors whose password differs.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.expected_password = Some(password.into());
        self
    }

    /// Controls whether connections expose an abort capability.
    ///
    /// A non-interruptible statement keeps running in the background after
    /// its caller stops waiting, like a backend that ignores cancellation.
    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    /// Makes statement execution panic.
    pub fn panicking_execute(mut self) -> Self {
        self.panic_on_execute = true;
        self
    }

    pub fn with_rows(mut self, columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        self.columns = columns;
        self.rows = rows;
        self
    }

    pub fn with_rows_affected(mut self, rows_affected: u64) -> Self {
        self.rows_affected = rows_affected;
        self
    }

    pub fn with_tables(mut self, tables: Vec<TableEntry>) -> Self {
        self.tables = tables;
        self
    }

    /// Returns the shared call counters.
    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DatabaseClient>> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        descriptor.validate()?;

        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }

        if let (Some(expected), ConnectionDescriptor::Network { user, password, .. }) =
            (&self.expected_password, descriptor)
        {
            if expected != password {
                return Err(SqldeskError::connection(format!(
                    "Authentication failed for user '{user}'. Check your credentials."
                )));
            }
        }

        Ok(Box::new(MockClient {
            script: self.clone(),
            interrupt: Arc::new(MockInterrupt {
                notify: Notify::new(),
                stats: self.stats.clone(),
            }),
        }))
    }
}

struct MockClient {
    script: MockBackend,
    interrupt: Arc<MockInterrupt>,
}

struct MockInterrupt {
    notify: Notify,
    stats: Arc<MockStats>,
}

impl Interrupt for MockInterrupt {
    fn interrupt(&self) {
        self.stats.aborts.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[async_trait]
impl DatabaseClient for MockClient {
    fn abort_handle(&self) -> AbortHandle {
        if self.script.interruptible {
            AbortHandle::new(self.interrupt.clone())
        } else {
            AbortHandle::unsupported()
        }
    }

    async fn execute(&mut self, _sql: &str, kind: StatementKind) -> Result<Execution> {
        let stats = self.script.stats.clone();
        stats.executes_started.fetch_add(1, Ordering::SeqCst);

        if self.script.panic_on_execute {
            panic!("mock backend panicked during execute");
        }

        let delay = self.script.execute_delay;
        if self.script.interruptible {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.interrupt.notify.notified() => {
                    return Err(SqldeskError::aborted("statement interrupted"));
                }
            }
            stats.executes_completed.fetch_add(1, Ordering::SeqCst);
        } else {
            // Runs detached so it finishes even if the caller stops waiting
            let statement = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                stats.executes_completed.fetch_add(1, Ordering::SeqCst);
            });
            statement
                .await
                .map_err(|e| SqldeskError::internal(format!("mock statement failed: {e}")))?;
        }

        if let Some(error) = &self.script.execute_error {
            return Err(error.clone());
        }

        Ok(match kind {
            StatementKind::RowReturning => Execution::Rows(Box::new(MockRowSet {
                columns: self.script.columns.clone(),
                rows: self.script.rows.clone(),
            })),
            StatementKind::RowAffecting => Execution::Affected(self.script.rows_affected),
        })
    }

    async fn list_tables(&mut self) -> Result<Vec<TableEntry>> {
        Ok(self.script.tables.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.script.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockRowSet {
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
}

impl RowSet for MockRowSet {
    fn columns(&self) -> Vec<ColumnInfo> {
        self.columns.clone()
    }

    fn materialize(self: Box<Self>) -> Vec<Row> {
        self.rows
    }
}
