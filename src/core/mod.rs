//! Runtime services: tiered memory, event bus and task scheduler.

pub mod auth;
pub mod bus;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod scheduler;

pub use auth::{authorize, Action, ActionKind, AllowAll, AllowList, Authorizer, Caller};
pub use bus::{BusStats, Event, EventBus, SubscriptionInfo, TopicPattern};
pub use error::{AppResult, CoreError, CoreResult};
pub use lifecycle::Lifecycle;
pub use memory::{
    EvictionListener, EvictionNotice, EvictionOutcome, EvictionPolicy, MemoryManager, MemorySnapshot,
    MemoryStats, Tier,
};
pub use scheduler::{Scheduler, SchedulerStats, TaskOutcome, TaskStatus, TaskSummary};
