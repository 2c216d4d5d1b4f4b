//! Event bus with a dedicated dispatcher thread.
//!
//! # Design
//!
//! - `publish` assigns a sequence number, records the event in the history
//!   ring and pushes it onto a priority heap, all under the queue lock, then
//!   returns. It never waits on handlers.
//! - One dispatcher thread pops the highest-priority event (publish order
//!   within a priority) and delivers it to a snapshot of the matching
//!   subscriptions, in subscription priority then insertion order.
//! - The subscription table sits behind its own `RwLock`; the queue, history
//!   and lifecycle state share one `Mutex` with two condvars (work available,
//!   queue idle).

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use super::event::{Event, TopicPattern};
use super::subscription::{Handler, Subscription, SubscriptionInfo, SubscriptionTable, Target};
use crate::config::BusConfig;
use crate::core::{CoreError, CoreResult, Lifecycle};
use crate::util::clock::now_ms;
use crate::util::serde::{Priority, SubscriptionId};
use crate::util::threads::join_with_timeout;

/// Lifecycle state of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    /// Constructed; events queue up until `start`.
    Idle,
    Running,
    /// Rejecting new events while the queue drains.
    Draining,
    Stopped,
}

/// Heap entry: higher priority first, then lower sequence first.
struct Queued<P>(Arc<Event<P>>);

impl<P> PartialEq for Queued<P> {
    fn eq(&self, other: &Self) -> bool {
        self.0.sequence == other.0.sequence
    }
}

impl<P> Eq for Queued<P> {}

impl<P> PartialOrd for Queued<P> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for Queued<P> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

struct DispatchQueue<P> {
    heap: BinaryHeap<Queued<P>>,
    history: VecDeque<Arc<Event<P>>>,
    next_sequence: u64,
    in_flight: bool,
    state: BusState,
}

impl<P> DispatchQueue<P> {
    fn is_idle(&self) -> bool {
        self.heap.is_empty() && !self.in_flight
    }
}

#[derive(Debug, Default)]
struct BusCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    handler_errors: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of bus statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Events accepted by `publish`.
    pub published: u64,
    /// Successful handler invocations.
    pub delivered: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_errors: u64,
    /// Queued events discarded at shutdown.
    pub dropped: u64,
    /// Events waiting for dispatch.
    pub queue_depth: usize,
    /// Live subscriptions.
    pub subscribers: usize,
    /// Events held in the history ring.
    pub history_len: usize,
    /// Whether the dispatcher is running.
    pub running: bool,
}

struct BusInner<P> {
    config: BusConfig,
    subscriptions: RwLock<SubscriptionTable<P>>,
    next_subscription: AtomicU64,
    queue: Mutex<DispatchQueue<P>>,
    work_available: Condvar,
    idle: Condvar,
    counters: BusCounters,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// In-process publish/subscribe bus.
///
/// Cloning is cheap and every clone refers to the same bus.
pub struct EventBus<P> {
    inner: Arc<BusInner<P>>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> std::fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<P> EventBus<P>
where
    P: Send + Sync + 'static,
{
    /// Create a stopped bus. Call [`Lifecycle::start`] to begin delivery;
    /// events published before that are queued.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn new(config: BusConfig) -> CoreResult<Self> {
        config.validate()?;
        let history = VecDeque::with_capacity(config.history_size.min(4096));
        Ok(Self {
            inner: Arc::new(BusInner {
                config,
                subscriptions: RwLock::new(SubscriptionTable::new()),
                next_subscription: AtomicU64::new(1),
                queue: Mutex::new(DispatchQueue {
                    heap: BinaryHeap::new(),
                    history,
                    next_sequence: 0,
                    in_flight: false,
                    state: BusState::Idle,
                }),
                work_available: Condvar::new(),
                idle: Condvar::new(),
                counters: BusCounters::default(),
                dispatcher: Mutex::new(None),
            }),
        })
    }

    /// Publish `payload` on `topic`, returning the assigned sequence number.
    ///
    /// Returns as soon as the event is queued.
    ///
    /// # Errors
    ///
    /// Returns `Shutdown` once the bus has been stopped.
    pub fn publish(&self, topic: impl Into<String>, payload: P, priority: Priority) -> CoreResult<u64> {
        let topic = topic.into();
        let mut queue = self.inner.queue.lock();
        if matches!(queue.state, BusState::Draining | BusState::Stopped) {
            return Err(CoreError::Shutdown("event bus"));
        }

        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        let event = Arc::new(Event {
            topic,
            priority,
            payload,
            timestamp_ms: now_ms(),
            sequence,
        });

        if queue.history.len() >= self.inner.config.history_size {
            queue.history.pop_front();
        }
        queue.history.push_back(Arc::clone(&event));
        trace!(topic = %event.topic, sequence, priority = %priority, "event queued");
        queue.heap.push(Queued(event));
        drop(queue);

        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        self.inner.work_available.notify_one();
        Ok(sequence)
    }

    fn add_subscription(&self, pattern: &str, priority: Option<Priority>, target: Target<P>) -> CoreResult<SubscriptionId> {
        let pattern = TopicPattern::parse(pattern)?;
        if self.inner.queue.lock().state == BusState::Stopped {
            return Err(CoreError::Shutdown("event bus"));
        }
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let priority = priority.unwrap_or(self.inner.config.default_priority);
        debug!(subscription = %id, pattern = %pattern, priority = %priority, "subscribed");
        self.inner.subscriptions.write().insert(Subscription {
            id,
            pattern,
            priority,
            target,
        });
        Ok(id)
    }

    /// Register `handler` for topics matching `pattern`.
    ///
    /// `priority` defaults to the configured default subscription priority.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty pattern and `Shutdown` once the
    /// bus is stopped.
    pub fn subscribe<F>(&self, pattern: &str, handler: F, priority: Option<Priority>) -> CoreResult<SubscriptionId>
    where
        F: Fn(&Event<P>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Handler<P> = Arc::new(handler);
        self.add_subscription(pattern, priority, Target::Callback(handler))
    }

    /// Register a channel-backed subscription and return its receiving end.
    ///
    /// # Errors
    ///
    /// Same as [`EventBus::subscribe`].
    pub fn subscribe_channel(
        &self,
        pattern: &str,
        priority: Option<Priority>,
    ) -> CoreResult<(SubscriptionId, Receiver<Arc<Event<P>>>)> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = self.add_subscription(pattern, priority, Target::Channel(tx))?;
        Ok((id, rx))
    }

    /// Remove a subscription. Deliveries already handed to the dispatcher
    /// are not recalled.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown handle.
    pub fn unsubscribe(&self, id: SubscriptionId) -> CoreResult<()> {
        if self.inner.subscriptions.write().remove(id) {
            debug!(subscription = %id, "unsubscribed");
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("subscription {id}")))
        }
    }

    /// Live subscriptions in delivery order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.subscriptions.read().infos()
    }

    /// The whole history ring, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Arc<Event<P>>> {
        self.inner.queue.lock().history.iter().cloned().collect()
    }

    /// The `limit` most recent events, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Arc<Event<P>>> {
        let queue = self.inner.queue.lock();
        let skip = queue.history.len().saturating_sub(limit);
        queue.history.iter().skip(skip).cloned().collect()
    }

    /// Block until nothing is queued or being delivered, or `timeout`
    /// elapses. Returns `true` if the bus went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut queue = self.inner.queue.lock();
        let _ = self
            .inner
            .idle
            .wait_while_for(&mut queue, |q| !q.is_idle(), timeout);
        queue.is_idle()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let (queue_depth, history_len, running) = {
            let queue = self.inner.queue.lock();
            (queue.heap.len(), queue.history.len(), queue.state == BusState::Running)
        };
        let c = &self.inner.counters;
        BusStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            handler_errors: c.handler_errors.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            queue_depth,
            subscribers: self.inner.subscriptions.read().len(),
            history_len,
            running,
        }
    }
}

impl<P> BusInner<P>
where
    P: Send + Sync + 'static,
{
    fn dispatch_loop(&self) {
        debug!("event dispatcher started");
        loop {
            let event = {
                let mut queue = self.queue.lock();
                loop {
                    if queue.state == BusState::Stopped {
                        debug!("event dispatcher exiting");
                        return;
                    }
                    if let Some(Queued(event)) = queue.heap.pop() {
                        queue.in_flight = true;
                        break event;
                    }
                    self.work_available.wait(&mut queue);
                }
            };

            self.deliver(&event);

            let mut queue = self.queue.lock();
            queue.in_flight = false;
            if queue.heap.is_empty() {
                self.idle.notify_all();
            }
        }
    }

    fn deliver(&self, event: &Arc<Event<P>>) {
        let targets = self.subscriptions.read().matching(&event.topic);
        trace!(topic = %event.topic, sequence = event.sequence, targets = targets.len(), "dispatching");

        for sub in targets {
            match catch_unwind(AssertUnwindSafe(|| sub.deliver(event))) {
                Ok(Ok(())) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    self.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription = %sub.id,
                        topic = %event.topic,
                        sequence = event.sequence,
                        error = %e,
                        "event handler failed"
                    );
                }
                Err(_) => {
                    self.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        subscription = %sub.id,
                        topic = %event.topic,
                        sequence = event.sequence,
                        "event handler panicked"
                    );
                }
            }
        }
    }
}

impl<P> Lifecycle for EventBus<P>
where
    P: Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "event_bus"
    }

    fn start(&self) -> CoreResult<()> {
        let mut dispatcher = self.inner.dispatcher.lock();
        {
            let mut queue = self.inner.queue.lock();
            match queue.state {
                BusState::Running => return Ok(()),
                BusState::Draining | BusState::Stopped => {
                    return Err(CoreError::Shutdown("event bus"))
                }
                BusState::Idle => queue.state = BusState::Running,
            }
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("event-dispatch".into())
            .spawn(move || inner.dispatch_loop())
            .map_err(|e| {
                self.inner.queue.lock().state = BusState::Idle;
                CoreError::Internal(format!("failed to spawn event dispatcher: {e}"))
            })?;
        *dispatcher = Some(handle);
        info!(
            history_size = self.inner.config.history_size,
            default_priority = %self.inner.config.default_priority,
            "event bus started"
        );
        Ok(())
    }

    fn stop(&self) -> CoreResult<()> {
        let grace = self.inner.config.shutdown_grace();
        let mut queue = self.inner.queue.lock();
        match queue.state {
            BusState::Stopped | BusState::Draining => return Ok(()),
            BusState::Running => {
                queue.state = BusState::Draining;
                let _ = self
                    .inner
                    .idle
                    .wait_while_for(&mut queue, |q| !q.is_idle(), grace);
            }
            BusState::Idle => {}
        }

        let dropped = queue.heap.len();
        queue.heap.clear();
        queue.state = BusState::Stopped;
        drop(queue);
        self.inner.work_available.notify_all();
        self.inner.idle.notify_all();

        if dropped > 0 {
            self.inner
                .counters
                .dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
            warn!(dropped, "undelivered events dropped at shutdown");
        }

        if let Some(handle) = self.inner.dispatcher.lock().take() {
            join_with_timeout(handle, grace.max(Duration::from_millis(100)), "event-dispatch");
        }
        self.inner.subscriptions.write().clear();
        info!("event bus stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.inner.queue.lock().state == BusState::Running
    }
}
