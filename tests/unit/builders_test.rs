//! Tests for builder modules

use serde_json::Value;
use sagco_core::builders::{build_bus, build_scheduler, build_services, Services};
use sagco_core::config::RuntimeConfig;
use sagco_core::core::{CoreError, Lifecycle};

#[test]
fn test_build_services_from_defaults() {
    let cfg = RuntimeConfig::default();
    let services: Services<Value, Value, Value> = build_services(&cfg, None).unwrap();
    assert_eq!(services.memory.stats().l1_capacity, 1000);
    assert!(!services.bus.is_running());
    assert_eq!(services.scheduler.stats().workers, 4);
}

#[test]
fn test_build_services_rejects_invalid_config() {
    let mut cfg = RuntimeConfig::default();
    cfg.memory.l1_capacity = 0;
    let err = build_services::<Value, Value, Value>(&cfg, None).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));
}

#[test]
fn test_individual_builders() {
    let mut cfg = RuntimeConfig::default();
    cfg.scheduler.workers = 2;
    let scheduler = build_scheduler::<u32>(&cfg).unwrap();
    assert_eq!(scheduler.stats().workers, 2);
    let bus = build_bus::<u32>(&cfg).unwrap();
    assert_eq!(bus.stats().subscribers, 0);
}
