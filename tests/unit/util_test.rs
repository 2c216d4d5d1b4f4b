//! Tests for utility functions

use std::time::Duration;

use sagco_core::util::{init_tracing, Clock, ManualClock, Priority, SubscriptionId, TaskId};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_priority_parse() {
    assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
    assert_eq!(" low ".parse::<Priority>().unwrap(), Priority::Low);
    assert!("urgent".parse::<Priority>().is_err());
}

#[test]
fn test_priority_serde_is_snake_case() {
    assert_eq!(serde_json::to_string(&Priority::Critical).unwrap(), "\"critical\"");
}

#[test]
fn test_task_id_runs_share_root() {
    let first = TaskId::generate();
    let second = first.next_run();
    assert_eq!(first.root, second.root);
    assert_eq!(second.run, 1);
    assert_eq!(second.root_id(), first);
    assert!(second.to_string().ends_with("#1"));
    assert_ne!(TaskId::generate(), first);
}

#[test]
fn test_task_id_run_saturates() {
    let last = TaskId {
        run: u32::MAX,
        ..TaskId::generate()
    };
    let next = last.next_run();
    assert_eq!(next.run, u32::MAX);
    assert_eq!(next.root, last.root);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    assert!(tracing::dispatcher::has_been_set());
    tracing::debug!(target: "sagco_core", "tracing initialised");
}

#[test]
fn test_subscription_id_display() {
    assert_eq!(SubscriptionId(7).to_string(), "sub-7");
}

#[test]
fn test_manual_clock_advances() {
    let clock = ManualClock::new();
    let start = clock.now();
    clock.advance(Duration::from_secs(3));
    assert_eq!(clock.now() - start, Duration::from_secs(3));
}
