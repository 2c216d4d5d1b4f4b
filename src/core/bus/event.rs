//! Event and topic-pattern types.

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult};
use crate::util::serde::Priority;

/// Topic carried by task-start events.
pub const TOPIC_TASK_STARTED: &str = "task.started";
/// Topic carried by task-success events.
pub const TOPIC_TASK_COMPLETED: &str = "task.completed";
/// Topic carried by task-failure events.
pub const TOPIC_TASK_FAILED: &str = "task.failed";
/// Topic carried by L1 eviction events.
pub const TOPIC_MEMORY_EVICTION: &str = "memory.eviction";
/// Topic published once boot finishes.
pub const TOPIC_BOOT_COMPLETE: &str = "system.boot.complete";
/// Topic published when shutdown begins.
pub const TOPIC_SHUTDOWN: &str = "system.shutdown";

/// A published event. Immutable once the bus assigns its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    /// Topic the event was published on.
    pub topic: String,
    /// Delivery priority.
    pub priority: Priority,
    /// Opaque payload.
    pub payload: P,
    /// Publish time, ms since epoch.
    pub timestamp_ms: u128,
    /// Monotonic sequence number assigned by the bus.
    pub sequence: u64,
}

/// Which topics a subscription receives.
///
/// - `*` matches every topic;
/// - `prefix.*` matches every topic starting with `prefix.`;
/// - anything else matches that exact topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicPattern {
    /// Universal wildcard.
    All,
    /// Topics under a dotted prefix (stored with the trailing dot).
    Prefix(String),
    /// A single topic.
    Exact(String),
}

impl TopicPattern {
    /// Parse a pattern string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty pattern.
    pub fn parse(pattern: &str) -> CoreResult<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(CoreError::invalid("topic pattern must not be empty"));
        }
        if pattern == "*" {
            return Ok(Self::All);
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            if prefix.ends_with('.') {
                return Ok(Self::Prefix(prefix.to_owned()));
            }
        }
        Ok(Self::Exact(pattern.to_owned()))
    }

    /// Whether `topic` is covered by this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
            Self::Exact(exact) => exact == topic,
        }
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Exact(exact) => f.write_str(exact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_forms() {
        assert_eq!(TopicPattern::parse("*").unwrap(), TopicPattern::All);
        assert_eq!(
            TopicPattern::parse("task.*").unwrap(),
            TopicPattern::Prefix("task.".into())
        );
        assert_eq!(
            TopicPattern::parse("task.completed").unwrap(),
            TopicPattern::Exact("task.completed".into())
        );
        assert!(TopicPattern::parse("  ").is_err());
    }

    #[test]
    fn prefix_requires_segment_boundary() {
        let pattern = TopicPattern::parse("task.*").unwrap();
        assert!(pattern.matches("task.completed"));
        assert!(!pattern.matches("tasks.completed"));
        assert!(!pattern.matches("task"));
    }

    #[test]
    fn middle_wildcard_is_literal() {
        let pattern = TopicPattern::parse("a*b").unwrap();
        assert!(pattern.matches("a*b"));
        assert!(!pattern.matches("axb"));
    }
}
