//! Priority scheduler drained by a fixed pool of OS worker threads.
//!
//! # Design
//!
//! - The queue, the task table and the recurring-series table share one
//!   `Mutex`. `work_available` wakes workers (new task, task became due,
//!   shutdown); `task_finished` wakes waiters on results and `stop`.
//! - Workers sleep on the condvar until the earliest delayed task is due;
//!   nothing polls.
//! - Work items run outside the lock under `catch_unwind`, so a panicking
//!   item fails its task and the worker carries on.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::{QueueEntry, TaskQueue};
use super::task::{TaskOutcome, TaskRecord, TaskStatus, TaskSummary, Work};
use crate::config::SchedulerConfig;
use crate::core::bus::{EventBus, TOPIC_TASK_COMPLETED, TOPIC_TASK_FAILED, TOPIC_TASK_STARTED};
use crate::core::{CoreError, CoreResult, Lifecycle};
use crate::util::serde::{Priority, TaskId};
use crate::util::threads::join_with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Accepting tasks, no workers yet.
    Idle,
    Running,
    /// Rejecting new tasks while in-flight work finishes.
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct SeriesState {
    current: TaskId,
    active: bool,
}

struct SchedState<R> {
    queue: TaskQueue,
    tasks: HashMap<TaskId, TaskRecord<R>>,
    series: HashMap<Uuid, SeriesState>,
    next_seq: u64,
    running: usize,
    phase: Phase,
    last_purge: Instant,
}

impl<R> SchedState<R> {
    const fn accepting(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::Running)
    }

    fn enqueue(&mut self, record: TaskRecord<R>, now: Instant) {
        self.queue.push(
            QueueEntry {
                id: record.id,
                priority: record.priority,
                scheduled_at: record.scheduled_at,
                seq: record.seq,
            },
            now,
        );
        self.tasks.insert(record.id, record);
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn pending_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    /// Cancel a Pending record, ending its series if it is the current run.
    fn cancel_pending(&mut self, id: TaskId, now: Instant) -> bool {
        let Some(record) = self.tasks.get_mut(&id) else {
            return false;
        };
        if record.status != TaskStatus::Pending {
            return false;
        }
        record.finish(TaskStatus::Cancelled, None, now);
        if let Some(series) = self.series.get_mut(&id.root) {
            if series.current == id {
                series.active = false;
            }
        }
        true
    }

    /// Drop terminal records older than `retention`, along with queue
    /// entries that no longer point at a Pending record.
    fn purge(&mut self, now: Instant, retention: Duration) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, t| {
            t.finished_at
                .is_none_or(|at| now.saturating_duration_since(at) < retention)
        });
        let tasks = &self.tasks;
        self.series
            .retain(|_, s| s.active || tasks.contains_key(&s.current));
        self.queue.retain(|e| {
            tasks
                .get(&e.id)
                .is_some_and(|t| t.status == TaskStatus::Pending && t.seq == e.seq)
        });
        self.last_purge = now;
        before - self.tasks.len()
    }

    /// Purge at most once per retention window.
    fn maybe_purge(&mut self, now: Instant, retention: Duration) {
        if now.saturating_duration_since(self.last_purge) >= retention {
            let purged = self.purge(now, retention);
            if purged > 0 {
                debug!(purged, "expired task records purged");
            }
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerCounters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Snapshot of scheduler statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Tasks accepted (every recurring run counts).
    pub scheduled: u64,
    /// Tasks that finished successfully.
    pub completed: u64,
    /// Tasks that returned an error or panicked.
    pub failed: u64,
    /// Tasks cancelled before dispatch.
    pub cancelled: u64,
    /// Tasks waiting for eligibility or a worker.
    pub pending: usize,
    /// Tasks executing right now.
    pub running: usize,
    /// Recurring series still re-arming.
    pub active_series: usize,
    /// Worker threads in the pool.
    pub workers: usize,
    /// Whether workers are dispatching.
    pub is_running: bool,
}

struct SchedulerInner<R> {
    config: SchedulerConfig,
    state: Mutex<SchedState<R>>,
    work_available: Condvar,
    task_finished: Condvar,
    counters: SchedulerCounters,
    bus: RwLock<Option<EventBus<Value>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Priority task scheduler.
///
/// Tasks can be scheduled before [`Lifecycle::start`]; they are dispatched
/// once the workers are up. Cloning is cheap and shares the scheduler.
pub struct Scheduler<R> {
    inner: Arc<SchedulerInner<R>>,
}

impl<R> Clone for Scheduler<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> std::fmt::Debug for Scheduler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<R> Scheduler<R>
where
    R: Clone + Send + Serialize + 'static,
{
    /// Create a scheduler. Workers are spawned by [`Lifecycle::start`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn new(config: &SchedulerConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config: config.clone(),
                state: Mutex::new(SchedState {
                    queue: TaskQueue::new(),
                    tasks: HashMap::new(),
                    series: HashMap::new(),
                    next_seq: 0,
                    running: 0,
                    phase: Phase::Idle,
                    last_purge: Instant::now(),
                }),
                work_available: Condvar::new(),
                task_finished: Condvar::new(),
                counters: SchedulerCounters::default(),
                bus: RwLock::new(None),
                workers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Publish task lifecycle events on `bus` from now on.
    pub fn attach_event_bus(&self, bus: EventBus<Value>) {
        *self.inner.bus.write() = Some(bus);
    }

    /// Schedule a one-shot task, eligible after `delay` (immediately if
    /// `None`).
    ///
    /// # Errors
    ///
    /// Returns `Shutdown` once `stop` has begun and `InvalidArgument` for a
    /// delay that overflows the clock.
    pub fn schedule<F>(&self, work: F, delay: Option<Duration>, priority: Priority) -> CoreResult<TaskId>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        let now = Instant::now();
        let scheduled_at = now
            .checked_add(delay.unwrap_or_default())
            .ok_or_else(|| CoreError::invalid("delay is too large"))?;
        let id = TaskId::generate();

        let mut state = self.inner.state.lock();
        if !state.accepting() {
            return Err(CoreError::Shutdown("scheduler"));
        }
        let seq = state.next_seq();
        state.enqueue(
            TaskRecord::new(id, Work::Once(Box::new(work)), priority, scheduled_at, None, seq),
            now,
        );
        state.maybe_purge(now, self.inner.config.result_retention());
        drop(state);

        self.inner.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        self.inner.work_available.notify_one();
        debug!(task_id = %id, priority = %priority, delay_ms = delay.map_or(0, |d| d.as_millis()), "task scheduled");
        Ok(id)
    }

    /// Schedule a recurring task. The first run is eligible after
    /// `interval`; after each successful run the next one is eligible
    /// `interval` after it finished. A failed run ends the series.
    ///
    /// Returns the identifier of the first run; its `root` names the series.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero or overflowing interval, `Shutdown` once
    /// `stop` has begun.
    pub fn schedule_recurring<F>(&self, work: F, interval: Duration, priority: Priority) -> CoreResult<TaskId>
    where
        F: Fn() -> anyhow::Result<R> + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(CoreError::invalid("recurring interval must be greater than 0"));
        }
        let now = Instant::now();
        let scheduled_at = now
            .checked_add(interval)
            .ok_or_else(|| CoreError::invalid("interval is too large"))?;
        let id = TaskId::generate();

        let mut state = self.inner.state.lock();
        if !state.accepting() {
            return Err(CoreError::Shutdown("scheduler"));
        }
        let seq = state.next_seq();
        state.enqueue(
            TaskRecord::new(
                id,
                Work::Repeat(Arc::new(work)),
                priority,
                scheduled_at,
                Some(interval),
                seq,
            ),
            now,
        );
        state.series.insert(id.root, SeriesState { current: id, active: true });
        state.maybe_purge(now, self.inner.config.result_retention());
        drop(state);

        self.inner.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        self.inner.work_available.notify_one();
        debug!(task_id = %id, priority = %priority, interval_ms = interval.as_millis(), "recurring task scheduled");
        Ok(id)
    }

    /// Cancel a Pending task. Returns `false` if the task is already running
    /// or finished. Cancelling the current run of a recurring task ends the
    /// series.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown identifier.
    pub fn cancel(&self, id: TaskId) -> CoreResult<bool> {
        let mut state = self.inner.state.lock();
        if !state.tasks.contains_key(&id) {
            return Err(CoreError::NotFound(format!("task {id}")));
        }
        let cancelled = state.cancel_pending(id, Instant::now());
        drop(state);

        if cancelled {
            self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            self.inner.task_finished.notify_all();
            debug!(task_id = %id, "task cancelled");
        }
        Ok(cancelled)
    }

    /// End a recurring series whichever run is current. A Pending current run
    /// is cancelled; a Running one finishes but is not re-armed. Returns
    /// whether the series was still active.
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` does not belong to a known series.
    pub fn cancel_recurring(&self, id: TaskId) -> CoreResult<bool> {
        let mut state = self.inner.state.lock();
        let Some(series) = state.series.get_mut(&id.root) else {
            return Err(CoreError::NotFound(format!("recurring task {}", id.root_id())));
        };
        let was_active = series.active;
        let current = series.current;
        series.active = false;
        let cancelled = state.cancel_pending(current, Instant::now());
        drop(state);

        if cancelled {
            self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            self.inner.task_finished.notify_all();
        }
        debug!(task_id = %current, was_active, "recurring series cancelled");
        Ok(was_active)
    }

    /// Current status of a task.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown (or already taken) identifier.
    pub fn status(&self, id: TaskId) -> CoreResult<TaskStatus> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&id)
            .map(|t| t.status)
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
    }

    /// Current outcome of a task without waiting.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown identifier.
    pub fn result(&self, id: TaskId) -> CoreResult<TaskOutcome<R>> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&id)
            .map(TaskRecord::outcome)
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
    }

    /// Block until the task reaches a terminal state or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown identifier, `Timeout` if the task is still
    /// pending or running at the deadline.
    pub fn wait(&self, id: TaskId, timeout: Duration) -> CoreResult<TaskOutcome<R>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();
        loop {
            match state.tasks.get(&id) {
                None => return Err(CoreError::NotFound(format!("task {id}"))),
                Some(record) if record.status.is_terminal() => return Ok(record.outcome()),
                Some(_) => {}
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(CoreError::Timeout);
                    }
                    let _ = self.inner.task_finished.wait_until(&mut state, deadline);
                }
                None => self.inner.task_finished.wait(&mut state),
            }
        }
    }

    /// Async flavour of [`Scheduler::wait`]; the condvar wait runs on
    /// tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::wait`], plus `Internal` if the blocking task
    /// could not be joined.
    #[cfg(feature = "tokio-runtime")]
    pub async fn wait_async(&self, id: TaskId, timeout: Duration) -> CoreResult<TaskOutcome<R>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.wait(id, timeout))
            .await
            .map_err(|e| CoreError::Internal(format!("wait task failed: {e}")))?
    }

    /// Return a terminal outcome and discard the task record. Non-terminal
    /// tasks are reported as they are and kept.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown identifier.
    pub fn take_result(&self, id: TaskId) -> CoreResult<TaskOutcome<R>> {
        let mut state = self.inner.state.lock();
        let Some(record) = state.tasks.get(&id) else {
            return Err(CoreError::NotFound(format!("task {id}")));
        };
        if !record.status.is_terminal() {
            return Ok(record.outcome());
        }
        let outcome = record.outcome();
        state.tasks.remove(&id);
        if state
            .series
            .get(&id.root)
            .is_some_and(|s| !s.active && s.current == id)
        {
            state.series.remove(&id.root);
        }
        Ok(outcome)
    }

    /// Identifier of the current run of the series `id` belongs to.
    #[must_use]
    pub fn current_run(&self, id: TaskId) -> Option<TaskId> {
        self.inner.state.lock().series.get(&id.root).map(|s| s.current)
    }

    /// Most recently submitted tasks first, at most `limit`.
    #[must_use]
    pub fn list(&self, limit: usize) -> Vec<TaskSummary> {
        let state = self.inner.state.lock();
        let mut records: Vec<&TaskRecord<R>> = state.tasks.values().collect();
        records.sort_by(|a, b| b.seq.cmp(&a.seq));
        records.into_iter().take(limit).map(TaskRecord::summary).collect()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let (pending, running, active_series, is_running) = {
            let state = self.inner.state.lock();
            (
                state.pending_count(),
                state.running,
                state.series.values().filter(|s| s.active).count(),
                state.phase == Phase::Running,
            )
        };
        let c = &self.inner.counters;
        SchedulerStats {
            scheduled: c.scheduled.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            pending,
            running,
            active_series,
            workers: self.inner.config.workers,
            is_running,
        }
    }

    fn spawn_worker(&self, worker_id: usize) -> std::io::Result<JoinHandle<()>> {
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name(format!("sched-worker-{worker_id}"))
            .stack_size(self.inner.config.thread_stack_size)
            .spawn(move || inner.worker_loop(worker_id))
    }
}

impl<R> SchedulerInner<R>
where
    R: Clone + Send + Serialize + 'static,
{
    fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "scheduler worker started");
        loop {
            let (entry, work) = {
                let mut state = self.state.lock();
                loop {
                    if state.phase == Phase::Stopped {
                        debug!(worker_id, "scheduler worker exiting");
                        return;
                    }
                    if let Some(picked) = Self::pick(&mut state, Instant::now()) {
                        break picked;
                    }
                    match state.queue.next_due() {
                        Some(due) => {
                            let _ = self.work_available.wait_until(&mut state, due);
                        }
                        None => self.work_available.wait(&mut state),
                    }
                }
            };
            self.run_task(worker_id, entry, work);
        }
    }

    /// Pop the best eligible Pending task and mark it Running.
    fn pick(state: &mut SchedState<R>, now: Instant) -> Option<(QueueEntry, Work<R>)> {
        let st = &mut *state;
        st.queue.promote_due(now);
        loop {
            let tasks = &st.tasks;
            let entry = st.queue.pop_ready(|e| {
                tasks
                    .get(&e.id)
                    .is_some_and(|t| t.status == TaskStatus::Pending && t.seq == e.seq)
            })?;
            let Some(record) = st.tasks.get_mut(&entry.id) else {
                continue;
            };
            let Some(work) = record.work.take() else {
                record.finish(
                    TaskStatus::Failed,
                    Some(Err("task has no work item".into())),
                    now,
                );
                continue;
            };
            record.mark_running();
            st.running += 1;
            return Some((entry, work));
        }
    }

    fn run_task(&self, worker_id: usize, entry: QueueEntry, work: Work<R>) {
        let id = entry.id;
        let repeat = match &work {
            Work::Repeat(f) => Some(Arc::clone(f)),
            Work::Once(_) => None,
        };
        debug!(worker_id, task_id = %id, priority = %entry.priority, "task started");
        self.publish(TOPIC_TASK_STARTED, task_payload(id, entry.priority, worker_id), entry.priority);

        let result = match catch_unwind(AssertUnwindSafe(move || work.run())) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(panic) => Err(format!("task panicked: {}", panic_message(panic.as_ref()))),
        };

        let mut payload = task_payload(id, entry.priority, worker_id);
        match &result {
            Ok(value) => {
                payload["result"] = serde_json::to_value(value).unwrap_or_else(|e| {
                    warn!(task_id = %id, error = %e, "task result is not serializable");
                    Value::Null
                });
                self.publish(TOPIC_TASK_COMPLETED, payload, entry.priority);
            }
            Err(message) => {
                warn!(worker_id, task_id = %id, error = %message, "task failed");
                payload["error"] = Value::String(message.clone());
                self.publish(TOPIC_TASK_FAILED, payload, entry.priority);
            }
        }

        let succeeded = result.is_ok();
        let now = Instant::now();
        let mut state = self.state.lock();
        state.running -= 1;
        let interval = state.tasks.get_mut(&id).and_then(|record| {
            let status = if succeeded { TaskStatus::Completed } else { TaskStatus::Failed };
            record.finish(status, Some(result), now);
            record.interval
        });
        if succeeded {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut rearmed = None;
        if let (Some(interval), Some(repeat)) = (interval, repeat) {
            rearmed = self.rearm(&mut state, id, entry.priority, interval, repeat, succeeded, now);
        }
        state.maybe_purge(now, self.config.result_retention());
        drop(state);

        self.task_finished.notify_all();
        if rearmed.is_some() {
            self.work_available.notify_one();
        }
        debug!(worker_id, task_id = %id, succeeded, "task finished");
    }

    /// Submit the next run of a recurring series if it is still active.
    #[allow(clippy::too_many_arguments)]
    fn rearm(
        &self,
        state: &mut SchedState<R>,
        id: TaskId,
        priority: Priority,
        interval: Duration,
        repeat: super::task::RepeatWork<R>,
        succeeded: bool,
        now: Instant,
    ) -> Option<TaskId> {
        let accepting = state.phase == Phase::Running;
        let series = state.series.get_mut(&id.root)?;
        if series.current != id || !series.active {
            return None;
        }
        if !succeeded || !accepting {
            series.active = false;
            if !succeeded {
                info!(task_id = %id, "recurring series halted after failure");
            }
            return None;
        }
        let Some(scheduled_at) = now.checked_add(interval) else {
            series.active = false;
            return None;
        };
        let next = id.next_run();
        series.current = next;
        let seq = state.next_seq();
        state.enqueue(
            TaskRecord::new(next, Work::Repeat(repeat), priority, scheduled_at, Some(interval), seq),
            now,
        );
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %next, "recurring task re-armed");
        Some(next)
    }

    fn publish(&self, topic: &'static str, payload: Value, priority: Priority) {
        let bus = self.bus.read().clone();
        if let Some(bus) = bus {
            if let Err(e) = bus.publish(topic, payload, priority) {
                debug!(topic, error = %e, "task event not published");
            }
        }
    }
}

fn task_payload(id: TaskId, priority: Priority, worker_id: usize) -> Value {
    json!({
        "task_id": id.to_string(),
        "root": id.root.to_string(),
        "run": id.run,
        "priority": priority.as_str(),
        "worker_id": worker_id,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

impl<R> Lifecycle for Scheduler<R>
where
    R: Clone + Send + Serialize + 'static,
{
    fn name(&self) -> &'static str {
        "scheduler"
    }

    fn start(&self) -> CoreResult<()> {
        let mut workers = self.inner.workers.lock();
        {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Running => return Ok(()),
                Phase::Draining | Phase::Stopped => return Err(CoreError::Shutdown("scheduler")),
                Phase::Idle => state.phase = Phase::Running,
            }
        }

        for worker_id in 0..self.inner.config.workers {
            match self.spawn_worker(worker_id) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(worker_id, error = %e, "failed to spawn scheduler worker");
                    self.inner.state.lock().phase = Phase::Stopped;
                    self.inner.work_available.notify_all();
                    for handle in workers.drain(..) {
                        join_with_timeout(handle, Duration::from_secs(1), "sched-worker");
                    }
                    return Err(CoreError::Internal(format!(
                        "failed to spawn scheduler worker {worker_id}: {e}"
                    )));
                }
            }
        }
        self.inner.work_available.notify_all();
        info!(
            workers = self.inner.config.workers,
            shutdown_timeout_ms = self.inner.config.shutdown_timeout_ms,
            "scheduler started"
        );
        Ok(())
    }

    fn stop(&self) -> CoreResult<()> {
        let timeout = self.inner.config.shutdown_timeout();
        let started = Instant::now();
        let deadline = started.checked_add(timeout).unwrap_or(started);

        let mut state = self.inner.state.lock();
        let had_workers = match state.phase {
            Phase::Draining | Phase::Stopped => return Ok(()),
            Phase::Idle => false,
            Phase::Running => true,
        };
        state.phase = Phase::Draining;

        let now = Instant::now();
        for series in state.series.values_mut() {
            series.active = false;
        }
        state.queue.promote_due(now);
        let mut cancelled = 0_u64;
        for entry in state.queue.drain_delayed() {
            if state.cancel_pending(entry.id, now) {
                cancelled += 1;
            }
        }

        if had_workers {
            while state.running > 0 || state.pending_count() > 0 {
                if self
                    .inner
                    .task_finished
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    break;
                }
            }
        }

        let now = Instant::now();
        for entry in state.queue.drain_all() {
            if state.cancel_pending(entry.id, now) {
                cancelled += 1;
            }
        }
        let still_running = state.running;
        state.phase = Phase::Stopped;
        drop(state);

        self.inner.work_available.notify_all();
        self.inner.task_finished.notify_all();
        if cancelled > 0 {
            self.inner.counters.cancelled.fetch_add(cancelled, Ordering::Relaxed);
            warn!(cancelled, "pending tasks cancelled at shutdown");
        }
        if still_running > 0 {
            warn!(still_running, "tasks still running after shutdown timeout");
        }

        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(100));
        for handle in self.inner.workers.lock().drain(..) {
            join_with_timeout(handle, remaining, "sched-worker");
        }
        info!(elapsed_ms = started.elapsed().as_millis(), "scheduler stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.inner.state.lock().phase == Phase::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler(workers: usize) -> Scheduler<u32> {
        Scheduler::new(&SchedulerConfig {
            shutdown_timeout_ms: 2_000,
            ..SchedulerConfig::with_workers(workers)
        })
        .unwrap()
    }

    #[test]
    fn test_one_shot_completes() {
        let s = scheduler(2);
        s.start().unwrap();
        let id = s.schedule(|| Ok(7), None, Priority::Normal).unwrap();
        assert_eq!(s.wait(id, Duration::from_secs(5)).unwrap(), TaskOutcome::Completed(7));
        assert_eq!(s.status(id).unwrap(), TaskStatus::Completed);
        assert_eq!(s.stats().completed, 1);
        s.stop().unwrap();
    }

    #[test]
    fn test_unknown_task_is_not_found() {
        let s = scheduler(1);
        let id = TaskId::generate();
        assert!(matches!(s.status(id), Err(CoreError::NotFound(_))));
        assert!(matches!(s.cancel(id), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_cancel_pending_before_start() {
        let s = scheduler(1);
        let id = s.schedule(|| Ok(1), None, Priority::Normal).unwrap();
        assert!(s.cancel(id).unwrap());
        assert!(!s.cancel(id).unwrap());
        assert_eq!(s.result(id).unwrap(), TaskOutcome::Cancelled);
        s.start().unwrap();
        s.stop().unwrap();
        assert_eq!(s.status(id).unwrap(), TaskStatus::Cancelled);
    }

    #[test]
    fn test_panic_is_captured() {
        let s = scheduler(1);
        s.start().unwrap();
        let id = s.schedule(|| -> anyhow::Result<u32> { panic!("boom") }, None, Priority::High).unwrap();
        match s.wait(id, Duration::from_secs(5)).unwrap() {
            TaskOutcome::Failed(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected outcome {other:?}"),
        }
        let next = s.schedule(|| Ok(2), None, Priority::Normal).unwrap();
        assert_eq!(s.wait(next, Duration::from_secs(5)).unwrap(), TaskOutcome::Completed(2));
        s.stop().unwrap();
    }

    #[test]
    fn test_recurring_rearms_with_next_run() {
        let s = scheduler(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        s.start().unwrap();
        let first = s
            .schedule_recurring(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                },
                Duration::from_millis(10),
                Priority::Normal,
            )
            .unwrap();
        assert_eq!(s.wait(first, Duration::from_secs(5)).unwrap(), TaskOutcome::Completed(0));
        let current = s.current_run(first).unwrap();
        assert_eq!(current.root, first.root);
        assert!(current.run >= 1);
        assert!(s.cancel_recurring(first).unwrap());
        s.stop().unwrap();
        assert!(runs.load(Ordering::SeqCst) >= 1);
        assert_eq!(s.stats().active_series, 0);
    }

    #[test]
    fn test_take_result_discards_record() {
        let s = scheduler(1);
        s.start().unwrap();
        let id = s.schedule(|| Ok(3), None, Priority::Normal).unwrap();
        s.wait(id, Duration::from_secs(5)).unwrap();
        assert_eq!(s.take_result(id).unwrap(), TaskOutcome::Completed(3));
        assert!(matches!(s.take_result(id), Err(CoreError::NotFound(_))));
        s.stop().unwrap();
    }

    #[test]
    fn test_schedule_after_stop_is_rejected() {
        let s = scheduler(1);
        s.start().unwrap();
        s.stop().unwrap();
        assert_eq!(
            s.schedule(|| Ok(1), None, Priority::Normal).unwrap_err(),
            CoreError::Shutdown("scheduler")
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let s = scheduler(1);
        assert!(matches!(
            s.schedule_recurring(|| Ok(1), Duration::ZERO, Priority::Normal),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_panic_message_downcasts() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
    }

    #[test]
    fn test_purge_releases_cancelled_delayed_entries() {
        let s = Scheduler::new(&SchedulerConfig {
            result_retention_ms: 10,
            ..SchedulerConfig::with_workers(1)
        })
        .unwrap();
        let ids: Vec<TaskId> = (0..100)
            .map(|_| {
                s.schedule(|| Ok(0), Some(Duration::from_secs(3_600)), Priority::Low)
                    .unwrap()
            })
            .collect();
        let keep = s
            .schedule(|| Ok(1), Some(Duration::from_secs(3_600)), Priority::Low)
            .unwrap();
        for id in &ids {
            assert!(s.cancel(*id).unwrap());
        }

        std::thread::sleep(Duration::from_millis(20));
        s.schedule(|| Ok(2), None, Priority::Low).unwrap();

        let state = s.inner.state.lock();
        assert_eq!(state.tasks.len(), 2);
        assert!(state.tasks.contains_key(&keep));
        assert_eq!(state.queue.len(), 2);
    }
}
