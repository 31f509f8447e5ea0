//! A single query execution.
//!
//! A [`QueryTask`] owns one connection for its lifetime and walks it through
//! connect, execute and collect. Every step is preceded by a checkpoint that
//! tests the cancellation flag under the task lock; the same lock guards the
//! published [`AbortHandle`], so a concurrent [`QueryTask::cancel`] either
//! sees no handle or a live one, never a closed one.

use crate::db::{
    AbortHandle, Backend, ConnectionDescriptor, DatabaseClient, Execution, QueryResult,
    StatementKind,
};
use crate::error::SqldeskError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Unique identifier for a query task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Generates a new unique task ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a query task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Connecting,
    Connected,
    Executing,
    Collecting,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Returns true once the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Why a task was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Requested by the user.
    User,
    /// The watchdog fired after the given duration.
    TimedOut(Duration),
}

/// Terminal result of running a task.
#[derive(Debug)]
pub enum TaskOutcome {
    Completed(QueryResult),
    Failed(SqldeskError),
    Cancelled(CancelReason),
}

impl TaskOutcome {
    fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled(_) => TaskState::Cancelled,
        }
    }
}

/// State shared between the worker and the cancel path.
#[derive(Debug)]
struct Shared {
    state: TaskState,
    cancel: Option<CancelReason>,
    abort: Option<AbortHandle>,
}

/// One unit of work: a descriptor plus SQL text.
#[derive(Debug)]
pub struct QueryTask {
    id: TaskId,
    descriptor: ConnectionDescriptor,
    sql: String,
    kind: StatementKind,
    shared: Mutex<Shared>,
    token: CancellationToken,
}

impl QueryTask {
    /// Creates a task in the `Created` state. The statement is classified here.
    pub fn new(descriptor: ConnectionDescriptor, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let kind = StatementKind::classify(&sql);
        Self {
            id: TaskId::new(),
            descriptor,
            sql,
            kind,
            shared: Mutex::new(Shared {
                state: TaskState::Created,
                cancel: None,
                abort: None,
            }),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Returns the current state.
    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    /// Returns the cancellation reason, if the task was cancelled.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.lock().cancel
    }

    /// Completes once the task has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Requests cancellation.
    ///
    /// Sets the flag and aborts the in-flight statement if a connection is
    /// published. Never waits for the worker. Returns false when the task is
    /// already terminal or already cancelled, in which case nothing happens.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        {
            let mut shared = self.lock();
            if shared.state.is_terminal() || shared.cancel.is_some() {
                return false;
            }
            shared.cancel = Some(reason);
            if let Some(handle) = &shared.abort {
                debug!("{}: aborting in-flight statement", self.id);
                handle.abort();
            }
        }
        self.token.cancel();
        true
    }

    /// Runs the task to a terminal outcome.
    ///
    /// The connection, if one was opened, is closed before this returns.
    pub async fn run(&self, backend: &dyn Backend) -> TaskOutcome {
        let started = Instant::now();
        let outcome = self.drive(backend, started).await;
        self.settle(outcome)
    }

    async fn drive(&self, backend: &dyn Backend, started: Instant) -> TaskOutcome {
        if let Err(reason) = self.checkpoint(TaskState::Connecting) {
            return TaskOutcome::Cancelled(reason);
        }

        // A connect abandoned on cancel drops whatever it had opened
        let connected = tokio::select! {
            biased;
            _ = self.token.cancelled() => return self.cancelled_outcome(),
            result = backend.connect(&self.descriptor) => result,
        };
        let mut client = match connected {
            Ok(client) => client,
            Err(error) => return TaskOutcome::Failed(error),
        };

        if let Some(reason) = self.publish(client.as_ref()) {
            debug!("{}: cancelled while connecting, closing unpublished connection", self.id);
            close_client(self.id, client).await;
            return TaskOutcome::Cancelled(reason);
        }

        // Declared after `client`, so it unpublishes first even when unwinding
        let published = Published(self);
        let outcome = self.run_statement(client.as_mut(), started).await;

        drop(published);
        close_client(self.id, client).await;
        outcome
    }

    async fn run_statement(&self, client: &mut dyn DatabaseClient, started: Instant) -> TaskOutcome {
        if let Err(reason) = self.checkpoint(TaskState::Executing) {
            return TaskOutcome::Cancelled(reason);
        }

        let executed = tokio::select! {
            biased;
            _ = self.token.cancelled() => return self.cancelled_outcome(),
            result = client.execute(&self.sql, self.kind) => result,
        };

        let result = match executed {
            Ok(Execution::Rows(set)) => {
                // Rows are fetched; this guards only their decoding
                if let Err(reason) = self.checkpoint(TaskState::Collecting) {
                    return TaskOutcome::Cancelled(reason);
                }
                let columns = set.columns();
                QueryResult::with_rows(columns, set.materialize())
            }
            Ok(Execution::Affected(rows_affected)) => QueryResult::affected(rows_affected),
            Err(error) => return TaskOutcome::Failed(error),
        };

        TaskOutcome::Completed(result.with_elapsed(started.elapsed()))
    }

    /// Tests the flag and, if clear, moves to `next`.
    fn checkpoint(&self, next: TaskState) -> std::result::Result<(), CancelReason> {
        let mut shared = self.lock();
        if let Some(reason) = shared.cancel {
            debug!("{}: cancellation observed before {:?}", self.id, next);
            return Err(reason);
        }
        debug!("{}: {:?} -> {:?}", self.id, shared.state, next);
        shared.state = next;
        Ok(())
    }

    /// Publishes the abort handle unless the task was cancelled meanwhile.
    fn publish(&self, client: &dyn DatabaseClient) -> Option<CancelReason> {
        let mut shared = self.lock();
        if let Some(reason) = shared.cancel {
            return Some(reason);
        }
        shared.abort = Some(client.abort_handle());
        shared.state = TaskState::Connected;
        debug!("{}: connected", self.id);
        None
    }

    fn unpublish(&self) {
        self.lock().abort = None;
    }

    /// Applies the final checkpoint and records the terminal state.
    ///
    /// Once the flag is set, neither a result nor a backend error escapes: both
    /// become `Cancelled`. An abort the task never asked for stays a failure.
    fn settle(&self, outcome: TaskOutcome) -> TaskOutcome {
        let mut shared = self.lock();
        let outcome = match (outcome, shared.cancel) {
            (TaskOutcome::Completed(_), Some(reason)) => {
                debug!("{}: suppressing result of cancelled task", self.id);
                TaskOutcome::Cancelled(reason)
            }
            (TaskOutcome::Failed(error), Some(reason)) if error.is_aborted() => {
                debug!("{}: statement stopped by cancellation", self.id);
                TaskOutcome::Cancelled(reason)
            }
            (TaskOutcome::Failed(error), Some(reason)) => {
                debug!("{}: error after cancellation treated as cancelled: {error}", self.id);
                TaskOutcome::Cancelled(reason)
            }
            (TaskOutcome::Failed(error), None) if error.is_aborted() => {
                warn!("{}: statement aborted without a cancel request: {error}", self.id);
                TaskOutcome::Failed(error)
            }
            (outcome, _) => outcome,
        };
        shared.state = outcome.state();
        shared.abort = None;
        outcome
    }

    fn cancelled_outcome(&self) -> TaskOutcome {
        TaskOutcome::Cancelled(self.lock().cancel.unwrap_or(CancelReason::User))
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Withdraws the abort handle when dropped.
struct Published<'a>(&'a QueryTask);

impl Drop for Published<'_> {
    fn drop(&mut self) {
        self.0.unpublish();
    }
}

async fn close_client(id: TaskId, client: Box<dyn DatabaseClient>) {
    if let Err(e) = client.close().await {
        warn!("{id}: failed to close connection: {e}");
    }
}
