//! Builders that turn a [`crate::config::RuntimeConfig`] into services.

pub mod runtime_builder;

pub use runtime_builder::{build_bus, build_memory, build_scheduler, build_services, Services};
