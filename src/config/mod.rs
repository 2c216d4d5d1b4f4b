//! Configuration models for the memory manager, event bus and scheduler.

pub mod runtime;

pub use runtime::{BusConfig, EvictionMode, MemoryConfig, RuntimeConfig, SchedulerConfig};
