//! Per-slot execution coordinator.
//!
//! Each slot (one worksheet in the surrounding UI) runs at most one query at a
//! time. Submissions are scheduled on a bounded worker pool alongside a
//! timeout watchdog, and every accepted submission produces exactly one
//! [`QueryEvent`] on the channel returned by [`Coordinator::new`].

use crate::config::ExecutionConfig;
use crate::db::{Backend, ConnectionDescriptor};
use crate::error::{Result, SqldeskError};
use crate::query::events::{QueryEvent, QueryOutcome};
use crate::query::task::{CancelReason, QueryTask, TaskId, TaskOutcome};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identifier of an execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    /// Generates a new unique slot ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reasons a submission is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Slot {0} is already running a query")]
    SlotBusy(SlotId),
}

#[derive(Default)]
struct SlotEntry {
    task: Option<Arc<QueryTask>>,
    watchdog: Option<JoinHandle<()>>,
}

impl SlotEntry {
    fn holds(&self, task: &QueryTask) -> bool {
        self.task.as_ref().is_some_and(|t| t.id() == task.id())
    }

    fn disarm(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}

struct Inner {
    backend: Arc<dyn Backend>,
    slots: Mutex<HashMap<SlotId, SlotEntry>>,
    permits: Semaphore,
    timeout: Duration,
    events: mpsc::UnboundedSender<QueryEvent>,
    runtime: Handle,
}

/// Tracks the in-flight task of every slot.
///
/// Cloning yields another handle to the same slot table.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Creates a coordinator on the current tokio runtime.
    pub fn new(
        backend: Arc<dyn Backend>,
        config: &ExecutionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<QueryEvent>)> {
        let runtime = Handle::try_current()
            .map_err(|e| SqldeskError::internal(format!("No async runtime available: {e}")))?;
        Ok(Self::with_runtime(backend, config, runtime))
    }

    /// Creates a coordinator that schedules work on the given runtime, so
    /// that submissions can come from threads outside it.
    pub fn with_runtime(
        backend: Arc<dyn Backend>,
        config: &ExecutionConfig,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<QueryEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Inner {
            backend,
            slots: Mutex::new(HashMap::new()),
            permits: Semaphore::new(config.max_workers.max(1)),
            timeout: config.timeout(),
            events,
            runtime,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    /// Returns the default watchdog duration.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Opens a new, empty slot.
    pub fn open_slot(&self) -> SlotId {
        let slot = SlotId::new();
        self.inner.lock_slots().insert(slot, SlotEntry::default());
        debug!("Slot {slot} opened");
        slot
    }

    /// Cancels anything running in the slot and forgets it.
    pub fn close_slot(&self, slot: SlotId) {
        self.cancel(slot);
        self.inner.lock_slots().remove(&slot);
        debug!("Slot {slot} closed");
    }

    /// Returns true if the slot holds a task that has not finished.
    pub fn is_busy(&self, slot: SlotId) -> bool {
        self.inner
            .lock_slots()
            .get(&slot)
            .is_some_and(|entry| entry.task.is_some())
    }

    /// Submits a statement with the default timeout.
    pub fn submit(
        &self,
        slot: SlotId,
        descriptor: ConnectionDescriptor,
        sql: impl Into<String>,
    ) -> std::result::Result<TaskId, SubmitError> {
        self.submit_with_timeout(slot, descriptor, sql, self.inner.timeout)
    }

    /// Submits a statement, arming the watchdog for `timeout`.
    ///
    /// Returns immediately. Unknown slots are opened on first use.
    pub fn submit_with_timeout(
        &self,
        slot: SlotId,
        descriptor: ConnectionDescriptor,
        sql: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<TaskId, SubmitError> {
        let task = Arc::new(QueryTask::new(descriptor, sql));
        {
            let mut slots = self.inner.lock_slots();
            let entry = slots.entry(slot).or_default();
            if entry.task.is_some() {
                debug!("Slot {slot} busy, rejecting submission");
                return Err(SubmitError::SlotBusy(slot));
            }
            entry.task = Some(task.clone());
            entry.watchdog = Some(self.arm_watchdog(slot, &task, timeout));
        }

        info!(
            "Slot {slot}: submitted {} ({}) against {}",
            task.id(),
            if task.kind().returns_rows() { "rows" } else { "command" },
            task.descriptor().display_string()
        );

        let id = task.id();
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            let outcome = inner.execute(&task).await;
            inner.finish(slot, &task, outcome);
        });
        Ok(id)
    }

    /// Cancels the slot's task, if any. Idempotent.
    pub fn cancel(&self, slot: SlotId) {
        let task = {
            let mut slots = self.inner.lock_slots();
            let Some(entry) = slots.get_mut(&slot) else {
                return;
            };
            entry.disarm();
            entry.task.take()
        };

        if let Some(task) = task {
            info!("Slot {slot}: cancelling {}", task.id());
            task.cancel(CancelReason::User);
        }
    }

    /// Cancels every slot's task and forgets all slots.
    pub fn shutdown(&self) {
        let slots: Vec<SlotId> = self.inner.lock_slots().keys().copied().collect();
        for slot in slots {
            self.close_slot(slot);
        }
    }

    fn arm_watchdog(&self, slot: SlotId, task: &Arc<QueryTask>, timeout: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let task = Arc::downgrade(task);
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            expire(inner, task, slot, timeout);
        })
    }
}

fn expire(inner: Weak<Inner>, task: Weak<QueryTask>, slot: SlotId, timeout: Duration) {
    let (Some(inner), Some(task)) = (inner.upgrade(), task.upgrade()) else {
        return;
    };

    {
        let mut slots = inner.lock_slots();
        match slots.get_mut(&slot) {
            // Drops our own handle; the sleep has already finished
            Some(entry) if entry.holds(&task) => {
                entry.task = None;
                entry.watchdog = None;
            }
            _ => return,
        }
    }

    warn!("Slot {slot}: {} timed out after {timeout:?}", task.id());
    task.cancel(CancelReason::TimedOut(timeout));
}

impl Inner {
    async fn execute(&self, task: &QueryTask) -> TaskOutcome {
        // A task cancelled while queued skips the pool and stops at its first checkpoint
        let _permit = tokio::select! {
            biased;
            _ = task.cancelled() => None,
            permit = self.permits.acquire() => permit.ok(),
        };

        match AssertUnwindSafe(task.run(self.backend.as_ref()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("{} panicked: {message}", task.id());
                TaskOutcome::Failed(SqldeskError::internal(format!(
                    "Query task panicked: {message}"
                )))
            }
        }
    }

    fn finish(&self, slot: SlotId, task: &QueryTask, outcome: TaskOutcome) {
        {
            let mut slots = self.lock_slots();
            if let Some(entry) = slots.get_mut(&slot) {
                if entry.holds(task) {
                    entry.task = None;
                    entry.disarm();
                }
            }
        }

        let outcome = QueryOutcome::from(outcome);
        info!("Slot {slot}: {} finished: {}", task.id(), outcome.status_line());

        let event = QueryEvent {
            slot,
            task: task.id(),
            outcome,
        };
        if self.events.send(event).is_err() {
            debug!("Slot {slot}: event receiver dropped");
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<SlotId, SlotEntry>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
