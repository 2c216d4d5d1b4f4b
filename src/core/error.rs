//! Error types for runtime-core operations.

use thiserror::Error;

/// Errors produced by the memory manager, event bus, scheduler and façade.
///
/// Failures raised by task work items or event handlers never surface here;
/// they are captured on the task outcome or counted by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Unknown task or subscription identifier.
    #[error("not found: {0}")]
    NotFound(String),
    /// Invalid construction parameter or call argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The authorization collaborator rejected the call.
    #[error("permission denied: {caller} may not {action}")]
    PermissionDenied {
        /// Caller identity.
        caller: String,
        /// Rejected action.
        action: String,
    },
    /// Internal failure (worker spawn, task or handler error).
    #[error("internal error: {0}")]
    Internal(String),
    /// A bounded wait elapsed.
    #[error("operation timed out")]
    Timeout,
    /// The component has been stopped.
    #[error("{0} is shut down")]
    Shutdown(&'static str),
}

impl CoreError {
    /// Shorthand for [`CoreError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Result alias for runtime-core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
