//! Runtime façade and its status models.

pub mod api;
pub mod facade;

pub use api::{BootStage, BootStep, ComponentStatus, RuntimeStatus};
pub use facade::Runtime;
