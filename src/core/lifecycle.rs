//! Startup/shutdown contract between services and the bootloader.

use crate::core::CoreResult;

/// A service the bootloader starts and stops.
///
/// The runtime starts services in dependency order (memory, bus, scheduler)
/// and stops them in reverse. Both calls must be idempotent.
pub trait Lifecycle: Send + Sync {
    /// Short component name used in logs and boot status.
    fn name(&self) -> &'static str;

    /// Bring the service up.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot start (e.g. thread spawn failure).
    fn start(&self) -> CoreResult<()>;

    /// Bring the service down.
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown did not complete cleanly.
    fn stop(&self) -> CoreResult<()>;

    /// Whether the service is currently started.
    fn is_running(&self) -> bool;
}
