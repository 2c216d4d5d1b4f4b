//! # SAGCO Core
//!
//! The in-process core of the SAGCO runtime: a three-tier memory manager, a
//! prioritized publish/subscribe event bus and a priority task scheduler,
//! booted and stopped together by a façade.
//!
//! ## Services
//!
//! - **Memory manager**: L1 is a bounded LRU, L2 holds entries with a TTL,
//!   L3 is durable. Lookups search L1, L2, L3 in order and promote hits into
//!   L1. Entries evicted from L1 are demoted or dropped per the configured
//!   policy and reported to an eviction listener.
//! - **Event bus**: topics with exact, `*` and `prefix.*` patterns. A single
//!   dispatcher thread delivers events in priority order; handler failures
//!   are contained and counted.
//! - **Scheduler**: worker threads drain a priority queue of one-shot,
//!   delayed and recurring tasks, publishing `task.*` events on the bus.
//! - **Runtime**: starts memory, bus and scheduler in order, wires eviction
//!   events, a logging subscriber and a periodic cache sweep, and checks an
//!   [`core::Authorizer`] before every state-changing caller operation.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sagco_core::config::RuntimeConfig;
//! use sagco_core::core::{AllowAll, Caller, Tier};
//! use sagco_core::runtime::Runtime;
//! use sagco_core::util::Priority;
//!
//! let runtime = Runtime::boot(RuntimeConfig::from_env()?, Arc::new(AllowAll))?;
//! let caller = Caller::new("cli");
//! runtime.put(&caller, "greeting", "hello".into(), Tier::L1, None)?;
//! let id = runtime.schedule(&caller, || Ok(42.into()), None, Priority::High)?;
//! let outcome = runtime.scheduler().wait(id, Duration::from_secs(5))?;
//! runtime.shutdown()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Runtime services and their shared contracts.
pub mod core;
/// Configuration models with defaults, validation and loaders.
pub mod config;
/// Builders to construct services from configuration.
pub mod builders;
/// The runtime façade and its status surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
