//! Priority task scheduler.
//!
//! A fixed pool of worker threads drains an unbounded queue. Among the tasks
//! whose scheduled time has arrived, the highest priority runs first, then
//! the earliest scheduled, then the earliest submitted. Recurring tasks
//! re-submit a fresh run (same root id, next run number) after every
//! successful execution; a failure or a cancel ends the series.
//!
//! When an event bus is attached, every run publishes `task.started` and
//! then `task.completed` or `task.failed` before its terminal status becomes
//! visible through [`Scheduler::result`].

mod pool;
mod queue;
mod task;

pub use pool::{Scheduler, SchedulerStats};
pub use task::{OnceWork, RepeatWork, TaskOutcome, TaskStatus, TaskSummary};
