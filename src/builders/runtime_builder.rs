//! Build runtime services from configuration.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::core::{CoreResult, EventBus, MemoryManager, Scheduler};
use crate::util::clock::SharedClock;

/// The three services, constructed but not started.
#[derive(Debug)]
pub struct Services<V, P, R> {
    /// Tiered cache.
    pub memory: Arc<MemoryManager<V>>,
    /// Event bus.
    pub bus: EventBus<P>,
    /// Task scheduler.
    pub scheduler: Scheduler<R>,
}

/// Build a memory manager from the `memory` section.
///
/// # Errors
///
/// Returns `InvalidArgument` if the section is invalid.
pub fn build_memory<V: Clone>(cfg: &RuntimeConfig, clock: Option<SharedClock>) -> CoreResult<Arc<MemoryManager<V>>> {
    let manager = match clock {
        Some(clock) => MemoryManager::with_clock(&cfg.memory, clock)?,
        None => MemoryManager::new(&cfg.memory)?,
    };
    Ok(Arc::new(manager))
}

/// Build an event bus from the `bus` section.
///
/// # Errors
///
/// Returns `InvalidArgument` if the section is invalid.
pub fn build_bus<P>(cfg: &RuntimeConfig) -> CoreResult<EventBus<P>>
where
    P: Send + Sync + 'static,
{
    EventBus::new(cfg.bus.clone())
}

/// Build a scheduler from the `scheduler` section.
///
/// # Errors
///
/// Returns `InvalidArgument` if the section is invalid.
pub fn build_scheduler<R>(cfg: &RuntimeConfig) -> CoreResult<Scheduler<R>>
where
    R: Clone + Send + Serialize + 'static,
{
    Scheduler::new(&cfg.scheduler)
}

/// Validate the whole configuration, then build every service.
///
/// # Errors
///
/// Returns the first validation error; nothing is built in that case.
pub fn build_services<V, P, R>(cfg: &RuntimeConfig, clock: Option<SharedClock>) -> CoreResult<Services<V, P, R>>
where
    V: Clone,
    P: Send + Sync + 'static,
    R: Clone + Send + Serialize + 'static,
{
    cfg.validate()?;
    let services = Services {
        memory: build_memory(cfg, clock)?,
        bus: build_bus(cfg)?,
        scheduler: build_scheduler(cfg)?,
    };
    debug!(
        l1_capacity = cfg.memory.l1_capacity,
        history_size = cfg.bus.history_size,
        workers = cfg.scheduler.workers,
        "runtime services built"
    );
    Ok(services)
}
