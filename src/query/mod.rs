//! Query execution core for sqldesk.
//!
//! A [`QueryTask`] runs one statement on its own connection with cooperative
//! cancellation; the [`Coordinator`] keeps one task per slot, arms the timeout
//! watchdog and routes terminal [`QueryEvent`]s back to the caller.

pub mod coordinator;
pub mod events;
pub mod task;

pub use coordinator::{Coordinator, SlotId, SubmitError};
pub use events::{QueryEvent, QueryOutcome};
pub use task::{CancelReason, QueryTask, TaskId, TaskOutcome, TaskState};
