//! The `Runtime` façade: boots the services in order, wires them together
//! and exposes caller-scoped operations.
//!
//! Boot order is memory, bus, scheduler; shutdown runs in reverse after a
//! `system.shutdown` event. Operations that change state on behalf of an
//! external caller are checked against the [`Authorizer`] first and have no
//! side effect when refused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::api::{BootStage, BootStep, ComponentStatus, RuntimeStatus};
use crate::builders::{build_services, Services};
use crate::config::RuntimeConfig;
use crate::core::bus::{TOPIC_BOOT_COMPLETE, TOPIC_MEMORY_EVICTION, TOPIC_SHUTDOWN};
use crate::core::{
    authorize, Action, AppResult, Authorizer, Caller, CoreError, CoreResult, Event, EventBus,
    EvictionNotice, Lifecycle, MemoryManager, Scheduler, SubscriptionInfo, Tier,
};
use crate::util::clock::{now_ms, SharedClock};
use crate::util::serde::{Priority, SubscriptionId, TaskId};

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct BootRecord {
    stage: BootStage,
    booted_at_ms: u128,
    duration: Duration,
    steps: Vec<BootStep>,
    errors: Vec<String>,
}

impl BootRecord {
    fn run_step<T>(
        &mut self,
        name: &str,
        stage: BootStage,
        required: bool,
        step: impl FnOnce() -> CoreResult<T>,
    ) -> CoreResult<Option<T>> {
        self.stage = stage;
        let started = Instant::now();
        let result = step();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let error = result.as_ref().err().map(ToString::to_string);
        self.steps.push(BootStep {
            name: name.to_owned(),
            stage,
            required,
            duration_ms,
            error,
        });
        match result {
            Ok(value) => {
                debug!(step = name, stage = %stage, duration_ms, "boot step completed");
                Ok(Some(value))
            }
            Err(e) if required => {
                self.stage = BootStage::Failed;
                error!(step = name, stage = %stage, error = %e, "required boot step failed");
                Err(e)
            }
            Err(e) => {
                warn!(step = name, stage = %stage, error = %e, "optional boot step failed");
                self.errors.push(format!("{name} failed: {e}"));
                Ok(None)
            }
        }
    }
}

/// A booted runtime: tiered memory, event bus and scheduler, all carrying
/// `serde_json::Value` at the boundary.
pub struct Runtime {
    config: RuntimeConfig,
    memory: Arc<MemoryManager<Value>>,
    bus: EventBus<Value>,
    scheduler: Scheduler<Value>,
    authorizer: Arc<dyn Authorizer>,
    boot: Mutex<BootRecord>,
    sweep_task: Option<TaskId>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("stage", &self.boot.lock().stage)
            .field("shut_down", &self.shut_down.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Validate `config`, start every service and wire the defaults.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or a service cannot start; any
    /// service already started is stopped again before returning.
    pub fn boot(config: RuntimeConfig, authorizer: Arc<dyn Authorizer>) -> AppResult<Self> {
        Self::boot_with_clock(config, authorizer, None)
    }

    /// [`Runtime::boot`] with an explicit clock for the memory manager.
    ///
    /// # Errors
    ///
    /// Same as [`Runtime::boot`].
    pub fn boot_with_clock(
        config: RuntimeConfig,
        authorizer: Arc<dyn Authorizer>,
        clock: Option<SharedClock>,
    ) -> AppResult<Self> {
        let started = Instant::now();
        let mut record = BootRecord {
            stage: BootStage::Init,
            booted_at_ms: now_ms(),
            duration: Duration::ZERO,
            steps: Vec::new(),
            errors: Vec::new(),
        };
        info!(version = VERSION, "runtime boot started");

        let services: Services<Value, Value, Value> = record
            .run_step("Build services", BootStage::Init, true, || {
                build_services(&config, clock)
            })?
            .context("service construction produced nothing")?;
        let Services {
            memory,
            bus,
            scheduler,
        } = services;

        let started_services: [&dyn Lifecycle; 3] = [&*memory, &bus, &scheduler];
        let stages = [BootStage::Memory, BootStage::Bus, BootStage::Scheduler];
        for (index, (service, stage)) in started_services.iter().zip(stages).enumerate() {
            if stage == BootStage::Scheduler {
                scheduler.attach_event_bus(bus.clone());
            }
            let name = format!("Start {}", service.name());
            if let Err(e) = record.run_step(&name, stage, true, || service.start()) {
                for started in started_services[..index].iter().rev() {
                    if let Err(stop_err) = started.stop() {
                        warn!(component = started.name(), error = %stop_err, "rollback stop failed");
                    }
                }
                return Err(e).with_context(|| format!("runtime boot failed at stage {stage}"));
            }
        }

        let _ = record.run_step("Wire eviction events", BootStage::Ready, false, || {
            let events = bus.clone();
            memory.set_eviction_listener(Arc::new(move |notice: &EvictionNotice| {
                let payload = serde_json::to_value(notice).unwrap_or(Value::Null);
                if let Err(e) = events.publish(TOPIC_MEMORY_EVICTION, payload, Priority::Low) {
                    debug!(key = %notice.key, error = %e, "eviction event not published");
                }
            }));
            Ok(())
        });
        let _ = record.run_step("Subscribe event logger", BootStage::Ready, false, || {
            bus.subscribe("*", log_event, Some(Priority::Low))
        });
        let sweep_task = record
            .run_step("Schedule cache sweep", BootStage::Ready, false, || {
                let cache = Arc::clone(&memory);
                scheduler.schedule_recurring(
                    move || Ok(json!({ "expired": cache.sweep_expired() })),
                    config.memory.sweep_interval(),
                    Priority::Low,
                )
            })
            .ok()
            .flatten();

        record.stage = BootStage::Ready;
        record.duration = started.elapsed();
        let boot_duration_ms = u64::try_from(record.duration.as_millis()).unwrap_or(u64::MAX);
        if let Err(e) = bus.publish(
            TOPIC_BOOT_COMPLETE,
            json!({ "version": VERSION, "boot_duration_ms": boot_duration_ms }),
            Priority::High,
        ) {
            warn!(error = %e, "boot event not published");
        }
        info!(boot_duration_ms, errors = record.errors.len(), "runtime ready");

        Ok(Self {
            config,
            memory,
            bus,
            scheduler,
            authorizer,
            boot: Mutex::new(record),
            sweep_task,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Stage, boot timings, component liveness and counters.
    #[must_use]
    pub fn status(&self) -> RuntimeStatus {
        let boot = self.boot.lock();
        RuntimeStatus {
            version: VERSION.to_owned(),
            stage: boot.stage,
            booted_at_ms: boot.booted_at_ms,
            boot_duration_ms: u64::try_from(boot.duration.as_millis()).unwrap_or(u64::MAX),
            shut_down: self.shut_down.load(Ordering::Acquire),
            steps: boot.steps.clone(),
            components: self
                .components()
                .iter()
                .map(|c| ComponentStatus {
                    name: c.name().to_owned(),
                    running: c.is_running(),
                })
                .collect(),
            errors: boot.errors.clone(),
            memory: self.memory.stats(),
            bus: self.bus.stats(),
            scheduler: self.scheduler.stats(),
        }
    }

    /// Configuration the runtime was booted with.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The memory manager, for in-process use without authorization.
    #[must_use]
    pub fn memory(&self) -> &MemoryManager<Value> {
        &self.memory
    }

    /// The event bus, for in-process use without authorization.
    #[must_use]
    pub const fn bus(&self) -> &EventBus<Value> {
        &self.bus
    }

    /// The scheduler, for in-process use without authorization.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler<Value> {
        &self.scheduler
    }

    /// Identifier of the recurring cache-sweep series, if it was scheduled.
    #[must_use]
    pub const fn sweep_task(&self) -> Option<TaskId> {
        self.sweep_task
    }

    fn components(&self) -> [&dyn Lifecycle; 3] {
        [&*self.memory, &self.bus, &self.scheduler]
    }

    fn check(&self, caller: &Caller, action: &Action<'_>) -> CoreResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::Shutdown("runtime"));
        }
        authorize(self.authorizer.as_ref(), caller, action)
    }

    /// Store `value` under `key` in `tier`.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`, `Shutdown`, or the memory manager's
    /// `InvalidArgument` for a bad TTL.
    pub fn put(&self, caller: &Caller, key: &str, value: Value, tier: Tier, ttl: Option<Duration>) -> CoreResult<()> {
        self.check(caller, &Action::Put { key })?;
        self.memory.put(key, value, tier, ttl)
    }

    /// Read `key`. Reads are not subject to authorization.
    #[must_use]
    pub fn get(&self, caller: &Caller, key: &str) -> Option<Value> {
        let value = self.memory.get(key);
        debug!(caller = %caller, key, hit = value.is_some(), "runtime get");
        value
    }

    /// Remove `key` from every tier.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` or `Shutdown`.
    pub fn remove(&self, caller: &Caller, key: &str) -> CoreResult<bool> {
        self.check(caller, &Action::Remove { key })?;
        Ok(self.memory.remove(key))
    }

    /// Schedule a one-shot task.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`, or the scheduler's `Shutdown`/`InvalidArgument`.
    pub fn schedule<F>(&self, caller: &Caller, work: F, delay: Option<Duration>, priority: Priority) -> CoreResult<TaskId>
    where
        F: FnOnce() -> anyhow::Result<Value> + Send + 'static,
    {
        self.check(caller, &Action::Schedule)?;
        let id = self.scheduler.schedule(work, delay, priority)?;
        debug!(caller = %caller, task_id = %id, "task scheduled for caller");
        Ok(id)
    }

    /// Schedule a recurring task.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`, or the scheduler's `Shutdown`/`InvalidArgument`.
    pub fn schedule_recurring<F>(
        &self,
        caller: &Caller,
        work: F,
        interval: Duration,
        priority: Priority,
    ) -> CoreResult<TaskId>
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.check(caller, &Action::Schedule)?;
        self.scheduler.schedule_recurring(work, interval, priority)
    }

    /// Cancel a pending task.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`, `Shutdown` or `NotFound`.
    pub fn cancel(&self, caller: &Caller, id: TaskId) -> CoreResult<bool> {
        self.check(caller, &Action::Cancel)?;
        self.scheduler.cancel(id)
    }

    /// Subscribe `handler` to `pattern`.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`, `Shutdown` or `InvalidArgument` for an empty
    /// pattern.
    pub fn subscribe<F>(&self, caller: &Caller, pattern: &str, handler: F, priority: Option<Priority>) -> CoreResult<SubscriptionId>
    where
        F: Fn(&Event<Value>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.check(caller, &Action::Subscribe { pattern })?;
        self.bus.subscribe(pattern, handler, priority)
    }

    /// Remove a subscription. Any caller may drop a handle it holds.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown handle.
    pub fn unsubscribe(&self, caller: &Caller, id: SubscriptionId) -> CoreResult<()> {
        debug!(caller = %caller, subscription = %id, "runtime unsubscribe");
        self.bus.unsubscribe(id)
    }

    /// Live subscriptions in delivery order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.bus.subscriptions()
    }

    /// Publish an event.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` or `Shutdown`.
    pub fn publish(&self, caller: &Caller, topic: &str, payload: Value, priority: Priority) -> CoreResult<u64> {
        self.check(caller, &Action::Publish { topic })?;
        self.bus.publish(topic, payload, priority)
    }

    /// Publish `system.shutdown`, then stop the scheduler, the bus and the
    /// memory manager (which flushes the volatile tiers). Calling it again
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by a service; every service is
    /// stopped regardless.
    pub fn shutdown(&self) -> CoreResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("runtime shutdown started");
        if let Err(e) = self
            .bus
            .publish(TOPIC_SHUTDOWN, json!({ "version": VERSION }), Priority::Critical)
        {
            debug!(error = %e, "shutdown event not published");
        }

        let mut first_error = None;
        for service in self.components().iter().rev() {
            if let Err(e) = service.stop() {
                error!(component = service.name(), error = %e, "service stop failed");
                first_error.get_or_insert(e);
            }
        }
        info!("runtime shutdown complete");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::Acquire) {
            debug!("runtime dropped without explicit shutdown");
            let _ = self.shutdown();
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn log_event(event: &Event<Value>) -> anyhow::Result<()> {
    debug!(
        topic = %event.topic,
        sequence = event.sequence,
        priority = %event.priority,
        "event observed"
    );
    Ok(())
}
