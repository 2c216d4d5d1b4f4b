//! Integration tests for the event bus
//!
//! Validates delivery order across event and subscription priorities,
//! isolation of failing handlers, pattern matching and shutdown behaviour.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sagco_core::config::BusConfig;
use sagco_core::core::{CoreError, EventBus, Lifecycle};
use sagco_core::util::{Priority, SubscriptionId};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn bus() -> EventBus<String> {
    EventBus::new(BusConfig::default()).unwrap()
}

fn s(value: &str) -> String {
    value.to_string()
}

type Log = Arc<Mutex<Vec<String>>>;

fn recorder(bus: &EventBus<String>, pattern: &str, label: &'static str, priority: Option<Priority>) -> (SubscriptionId, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let id = bus
        .subscribe(
            pattern,
            move |event| {
                sink.lock().push(format!("{label}:{}", event.payload));
                Ok(())
            },
            priority,
        )
        .unwrap();
    (id, log)
}

const IDLE: Duration = Duration::from_secs(5);

// ============================================================================
// ORDERING
// ============================================================================

#[test]
fn test_critical_event_overtakes_queued_normal_event() {
    let bus = bus();
    let (_, log) = recorder(&bus, "*", "sub", None);

    bus.publish("work", s("B"), Priority::Normal).unwrap();
    bus.publish("work", s("A"), Priority::Critical).unwrap();
    bus.start().unwrap();
    assert!(bus.wait_idle(IDLE));

    assert_eq!(*log.lock(), vec![s("sub:A"), s("sub:B")]);
    bus.stop().unwrap();
}

#[test]
fn test_equal_priority_events_keep_publish_order() {
    let bus = bus();
    let (_, log) = recorder(&bus, "*", "sub", None);
    bus.start().unwrap();
    for i in 0..50 {
        bus.publish("seq", format!("{i}"), Priority::Normal).unwrap();
    }
    assert!(bus.wait_idle(IDLE));
    let expected: Vec<String> = (0..50).map(|i| format!("sub:{i}")).collect();
    assert_eq!(*log.lock(), expected);
    bus.stop().unwrap();
}

#[test]
fn test_subscribers_run_by_priority_then_registration() {
    let bus = bus();
    let order: Log = Arc::new(Mutex::new(Vec::new()));
    for (label, priority) in [
        ("low", Priority::Low),
        ("normal-1", Priority::Normal),
        ("critical", Priority::Critical),
        ("normal-2", Priority::Normal),
    ] {
        let sink = Arc::clone(&order);
        bus.subscribe(
            "*",
            move |_| {
                sink.lock().push(label.to_string());
                Ok(())
            },
            Some(priority),
        )
        .unwrap();
    }
    bus.start().unwrap();
    bus.publish("x", s("payload"), Priority::Normal).unwrap();
    assert!(bus.wait_idle(IDLE));
    assert_eq!(*order.lock(), vec!["critical", "normal-1", "normal-2", "low"]);
    bus.stop().unwrap();
}

// ============================================================================
// FAILURE ISOLATION
// ============================================================================

#[test]
fn test_failing_handlers_do_not_block_others() {
    let bus = bus();
    bus.subscribe("*", |_| Err(anyhow::anyhow!("handler refused")), Some(Priority::Critical))
        .unwrap();
    bus.subscribe("*", |_| -> anyhow::Result<()> { panic!("handler exploded") }, Some(Priority::High))
        .unwrap();
    let (_, log) = recorder(&bus, "*", "survivor", Some(Priority::Low));

    bus.start().unwrap();
    bus.publish("x", s("1"), Priority::Normal).unwrap();
    bus.publish("x", s("2"), Priority::Normal).unwrap();
    assert!(bus.wait_idle(IDLE));

    assert_eq!(*log.lock(), vec![s("survivor:1"), s("survivor:2")]);
    let stats = bus.stats();
    assert_eq!(stats.handler_errors, 4);
    assert_eq!(stats.delivered, 2);
    bus.stop().unwrap();
}

#[test]
fn test_publish_does_not_wait_for_handlers() {
    let bus = bus();
    bus.subscribe(
        "*",
        |_| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        },
        None,
    )
    .unwrap();
    bus.start().unwrap();

    let started = Instant::now();
    for i in 0..5 {
        bus.publish("slow", format!("{i}"), Priority::Normal).unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(bus.wait_idle(IDLE));
    bus.stop().unwrap();
}

// ============================================================================
// PATTERNS AND SUBSCRIPTIONS
// ============================================================================

#[test]
fn test_prefix_wildcard_matches_segment() {
    let bus = bus();
    let (_, tasks) = recorder(&bus, "task.*", "task", None);
    let (_, exact) = recorder(&bus, "system.shutdown", "exact", None);
    bus.start().unwrap();

    bus.publish("task.completed", s("t1"), Priority::Normal).unwrap();
    bus.publish("tasks.completed", s("t2"), Priority::Normal).unwrap();
    bus.publish("system.shutdown", s("s"), Priority::Normal).unwrap();
    bus.publish("system.shutdown.now", s("s2"), Priority::Normal).unwrap();
    assert!(bus.wait_idle(IDLE));

    assert_eq!(*tasks.lock(), vec![s("task:t1")]);
    assert_eq!(*exact.lock(), vec![s("exact:s")]);
    bus.stop().unwrap();
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let bus = bus();
    let (id, log) = recorder(&bus, "*", "sub", None);
    bus.start().unwrap();
    bus.publish("x", s("before"), Priority::Normal).unwrap();
    assert!(bus.wait_idle(IDLE));

    bus.unsubscribe(id).unwrap();
    assert!(matches!(bus.unsubscribe(id), Err(CoreError::NotFound(_))));
    bus.publish("x", s("after"), Priority::Normal).unwrap();
    assert!(bus.wait_idle(IDLE));

    assert_eq!(*log.lock(), vec![s("sub:before")]);
    bus.stop().unwrap();
}

#[test]
fn test_new_subscribers_do_not_see_history() {
    let bus = bus();
    bus.start().unwrap();
    bus.publish("x", s("old"), Priority::Normal).unwrap();
    assert!(bus.wait_idle(IDLE));

    let (_, rx) = bus.subscribe_channel("*", None).unwrap();
    bus.publish("x", s("new"), Priority::Normal).unwrap();
    assert!(bus.wait_idle(IDLE));

    let got: Vec<String> = rx.try_iter().map(|e| e.payload.clone()).collect();
    assert_eq!(got, vec![s("new")]);
    assert_eq!(bus.history().len(), 2);
    bus.stop().unwrap();
}

#[test]
fn test_empty_pattern_rejected() {
    let bus = bus();
    assert!(matches!(
        bus.subscribe("", |_| Ok(()), None),
        Err(CoreError::InvalidArgument(_))
    ));
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_stop_rejects_publish_and_clears_subscriptions() {
    let bus = bus();
    let (_, log) = recorder(&bus, "*", "sub", None);
    bus.start().unwrap();
    bus.publish("x", s("1"), Priority::Normal).unwrap();
    bus.stop().unwrap();

    assert_eq!(*log.lock(), vec![s("sub:1")]);
    assert_eq!(bus.publish("x", s("2"), Priority::Normal), Err(CoreError::Shutdown("event bus")));
    assert!(bus.subscriptions().is_empty());
    assert!(!bus.is_running());
}
