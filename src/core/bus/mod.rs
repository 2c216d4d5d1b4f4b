//! In-process publish/subscribe event bus.
//!
//! Delivery guarantees:
//! - for one event, matching subscriptions run Critical -> High -> Normal ->
//!   Low, ties in subscription order;
//! - events of equal priority are delivered in publish order; a queued
//!   higher-priority event may overtake an earlier lower-priority one;
//! - a failing or panicking handler never blocks delivery to the others.
//!
//! The history ring is diagnostic only. New subscribers never see past events.

mod event;
mod event_bus;
mod subscription;

pub use event::{
    Event, TopicPattern, TOPIC_BOOT_COMPLETE, TOPIC_MEMORY_EVICTION, TOPIC_SHUTDOWN,
    TOPIC_TASK_COMPLETED, TOPIC_TASK_FAILED, TOPIC_TASK_STARTED,
};
pub use event_bus::{BusStats, EventBus};
pub use subscription::{Handler, SubscriptionInfo};
