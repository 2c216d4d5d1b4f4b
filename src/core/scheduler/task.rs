//! Task records, statuses and outcomes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::{Priority, TaskId};

/// One-shot work item.
pub type OnceWork<R> = Box<dyn FnOnce() -> anyhow::Result<R> + Send>;

/// Repeatable work item shared by every run of a recurring task.
pub type RepeatWork<R> = Arc<dyn Fn() -> anyhow::Result<R> + Send + Sync>;

pub(crate) enum Work<R> {
    Once(OnceWork<R>),
    Repeat(RepeatWork<R>),
}

impl<R> Work<R> {
    pub(crate) fn run(self) -> anyhow::Result<R> {
        match self {
            Self::Once(f) => f(),
            Self::Repeat(f) => f(),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for eligibility and a free worker.
    Pending,
    /// Executing on a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// The work item returned an error or panicked.
    Failed,
    /// Cancelled before dispatch.
    Cancelled,
}

impl TaskStatus {
    /// Completed, Failed or Cancelled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What a caller learns about a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<R> {
    /// Not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Finished with a value.
    Completed(R),
    /// Finished with an error message.
    Failed(String),
    /// Cancelled before it ran.
    Cancelled,
}

impl<R> TaskOutcome<R> {
    /// Whether the outcome is final.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Cancelled)
    }

    /// Status corresponding to this outcome.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        match self {
            Self::Pending => TaskStatus::Pending,
            Self::Running => TaskStatus::Running,
            Self::Completed(_) => TaskStatus::Completed,
            Self::Failed(_) => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Summary row for task listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task identifier.
    pub id: TaskId,
    /// Priority.
    pub priority: Priority,
    /// Current status.
    pub status: TaskStatus,
    /// Recurrence interval, for recurring tasks.
    pub interval_ms: Option<u64>,
    /// Submission time (ms since epoch).
    pub submitted_at_ms: u128,
    /// Start time (ms since epoch).
    pub started_at_ms: Option<u128>,
    /// Finish time (ms since epoch).
    pub finished_at_ms: Option<u128>,
    /// Error message of a failed task.
    pub error: Option<String>,
}

pub(crate) struct TaskRecord<R> {
    pub(crate) id: TaskId,
    pub(crate) priority: Priority,
    pub(crate) scheduled_at: Instant,
    pub(crate) interval: Option<Duration>,
    pub(crate) seq: u64,
    pub(crate) status: TaskStatus,
    pub(crate) work: Option<Work<R>>,
    pub(crate) outcome: Option<Result<R, String>>,
    pub(crate) submitted_at_ms: u128,
    pub(crate) started_at_ms: Option<u128>,
    pub(crate) finished_at_ms: Option<u128>,
    /// Monotonic finish time, drives result retention.
    pub(crate) finished_at: Option<Instant>,
}

impl<R> TaskRecord<R> {
    pub(crate) fn new(
        id: TaskId,
        work: Work<R>,
        priority: Priority,
        scheduled_at: Instant,
        interval: Option<Duration>,
        seq: u64,
    ) -> Self {
        Self {
            id,
            priority,
            scheduled_at,
            interval,
            seq,
            status: TaskStatus::Pending,
            work: Some(work),
            outcome: None,
            submitted_at_ms: now_ms(),
            started_at_ms: None,
            finished_at_ms: None,
            finished_at: None,
        }
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at_ms = Some(now_ms());
    }

    pub(crate) fn finish(&mut self, status: TaskStatus, outcome: Option<Result<R, String>>, now: Instant) {
        self.status = status;
        self.outcome = outcome;
        self.work = None;
        self.finished_at_ms = Some(now_ms());
        self.finished_at = Some(now);
    }

    pub(crate) fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            priority: self.priority,
            status: self.status,
            interval_ms: self
                .interval
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            submitted_at_ms: self.submitted_at_ms,
            started_at_ms: self.started_at_ms,
            finished_at_ms: self.finished_at_ms,
            error: match &self.outcome {
                Some(Err(e)) => Some(e.clone()),
                _ => None,
            },
        }
    }
}

impl<R: Clone> TaskRecord<R> {
    pub(crate) fn outcome(&self) -> TaskOutcome<R> {
        match (self.status, &self.outcome) {
            (TaskStatus::Pending, _) => TaskOutcome::Pending,
            (TaskStatus::Running, _) => TaskOutcome::Running,
            (TaskStatus::Cancelled, _) => TaskOutcome::Cancelled,
            (TaskStatus::Completed | TaskStatus::Failed, Some(Ok(value))) => {
                TaskOutcome::Completed(value.clone())
            }
            (TaskStatus::Completed | TaskStatus::Failed, Some(Err(e))) => TaskOutcome::Failed(e.clone()),
            (TaskStatus::Completed | TaskStatus::Failed, None) => {
                TaskOutcome::Failed("task finished without an outcome".into())
            }
        }
    }
}
