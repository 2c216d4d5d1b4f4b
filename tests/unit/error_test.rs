//! Tests for error types

use sagco_core::core::{AppResult, CoreError};

#[test]
fn test_not_found_error() {
    let err = CoreError::NotFound("task 42".to_string());
    assert_eq!(format!("{err}"), "not found: task 42");
}

#[test]
fn test_invalid_argument_error() {
    let err = CoreError::invalid("ttl must be greater than 0");
    assert_eq!(format!("{err}"), "invalid argument: ttl must be greater than 0");
}

#[test]
fn test_permission_denied_error() {
    let err = CoreError::PermissionDenied {
        caller: "guest".to_string(),
        action: "remove `k`".to_string(),
    };
    assert_eq!(format!("{err}"), "permission denied: guest may not remove `k`");
}

#[test]
fn test_timeout_and_shutdown_errors() {
    assert_eq!(format!("{}", CoreError::Timeout), "operation timed out");
    assert_eq!(format!("{}", CoreError::Shutdown("event bus")), "event bus is shut down");
}

#[test]
fn test_core_error_converts_into_app_result() {
    fn fails() -> AppResult<()> {
        Err(CoreError::Internal("worker spawn".to_string()))?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert_eq!(err.to_string(), "internal error: worker spawn");
    assert!(err.downcast_ref::<CoreError>().is_some());
}
