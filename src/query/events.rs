//! Terminal notifications delivered to the owner of a slot.

use crate::db::{QueryResult, StatementKind};
use crate::query::coordinator::SlotId;
use crate::query::task::{CancelReason, TaskId, TaskOutcome};
use std::time::Duration;

/// Exactly one of these is sent per accepted submission.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub slot: SlotId,
    pub task: TaskId,
    pub outcome: QueryOutcome,
}

/// What the caller sees at the end of a query.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Succeeded(QueryResult),
    Failed(String),
    Cancelled,
    TimedOut(Duration),
}

impl From<TaskOutcome> for QueryOutcome {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Completed(result) => Self::Succeeded(result),
            TaskOutcome::Failed(error) => Self::Failed(error.message().to_string()),
            TaskOutcome::Cancelled(CancelReason::User) => Self::Cancelled,
            TaskOutcome::Cancelled(CancelReason::TimedOut(after)) => Self::TimedOut(after),
        }
    }
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Returns the result for successful outcomes.
    pub fn result(&self) -> Option<&QueryResult> {
        match self {
            Self::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    /// Renders the one-line status shown under the result grid.
    pub fn status_line(&self) -> String {
        match self {
            Self::Succeeded(result) => {
                let secs = result.elapsed.as_secs_f64();
                match result.kind {
                    StatementKind::RowReturning => format!(
                        "Query executed successfully | Total rows: {} | Time: {secs:.2} sec",
                        result.row_count
                    ),
                    StatementKind::RowAffecting => format!(
                        "Command executed successfully | Rows affected: {} | Time: {secs:.2} sec",
                        result.row_count
                    ),
                }
            }
            Self::Failed(message) => format!("Error: {message}"),
            Self::Cancelled => "Query cancelled by user.".to_string(),
            Self::TimedOut(after) => {
                format!("Error: Query timed out after {} seconds.", after.as_secs())
            }
        }
    }
}
