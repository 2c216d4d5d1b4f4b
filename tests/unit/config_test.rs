//! Tests for configuration validation and loading

use std::time::Duration;

use sagco_core::config::{EvictionMode, RuntimeConfig};
use sagco_core::core::{CoreError, EvictionPolicy};
use sagco_core::util::Priority;

#[test]
fn test_defaults_are_valid() {
    let cfg = RuntimeConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.memory.l1_capacity, 1000);
    assert_eq!(cfg.memory.l2_default_ttl(), Duration::from_secs(300));
    assert_eq!(cfg.memory.eviction_policy, EvictionMode::Demote);
    assert_eq!(cfg.bus.history_size, 1000);
    assert_eq!(cfg.bus.default_priority, Priority::Normal);
    assert_eq!(cfg.scheduler.workers, 4);
    assert_eq!(cfg.scheduler.shutdown_timeout(), Duration::from_secs(5));
}

#[test]
fn test_from_map_overrides() {
    let cfg = RuntimeConfig::from_map([
        ("memory.l1_capacity", "2"),
        ("memory.eviction_policy", "drop"),
        ("bus.default_priority", "high"),
        ("scheduler.workers", "1"),
    ])
    .unwrap();
    assert_eq!(cfg.memory.l1_capacity, 2);
    assert_eq!(cfg.memory.eviction_policy(), EvictionPolicy::Drop);
    assert_eq!(cfg.bus.default_priority, Priority::High);
    assert_eq!(cfg.scheduler.workers, 1);
}

#[test]
fn test_from_map_rejects_unknown_key() {
    let err = RuntimeConfig::from_map([("memory.size", "10")]).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));
}

#[test]
fn test_from_map_rejects_bad_value() {
    assert!(RuntimeConfig::from_map([("bus.history_size", "many")]).is_err());
    assert!(RuntimeConfig::from_map([("bus.history_size", "0")]).is_err());
    assert!(RuntimeConfig::from_map([("memory.eviction_policy", "keep")]).is_err());
}

#[test]
fn test_from_json_str_partial_sections() {
    let cfg = RuntimeConfig::from_json_str(r#"{ "scheduler": { "workers": 8 } }"#).unwrap();
    assert_eq!(cfg.scheduler.workers, 8);
    assert_eq!(cfg.memory.l1_capacity, 1000);
    assert!(RuntimeConfig::from_json_str(r#"{ "memory": { "l1_capacity": 0 } }"#).is_err());
    assert!(RuntimeConfig::from_json_str("not json").is_err());
}

#[test]
fn test_zero_ttl_and_timeout_are_invalid() {
    let mut cfg = RuntimeConfig::default();
    cfg.memory.l2_default_ttl_ms = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = RuntimeConfig::default();
    cfg.scheduler.shutdown_timeout_ms = 0;
    assert!(cfg.validate().is_err());
}
