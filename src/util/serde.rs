//! Serializable identifiers and enums shared by every component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::CoreError;

/// Priority shared by events, subscriptions and tasks.
///
/// Ordering is ascending: `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Latency-sensitive work.
    High,
    /// Must run before anything else.
    Critical,
}

impl Priority {
    /// Lowercase name used in configuration and event payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown priority `{other}`"
            ))),
        }
    }
}

/// Task identifier.
///
/// `root` is generated once per submission; recurring tasks keep the root and
/// bump `run` for every re-submitted instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    /// Identifier shared by every run of a task.
    pub root: Uuid,
    /// Run number, `0` for the first (or only) instance.
    pub run: u32,
}

impl TaskId {
    /// Fresh identifier for a newly submitted task.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            root: Uuid::new_v4(),
            run: 0,
        }
    }

    /// Identifier of the following run in the same series. The run number
    /// saturates at `u32::MAX`.
    #[must_use]
    pub const fn next_run(self) -> Self {
        Self {
            root: self.root,
            run: self.run.saturating_add(1),
        }
    }

    /// Identifier of the first run of this series.
    #[must_use]
    pub const fn root_id(self) -> Self {
        Self {
            root: self.root,
            run: 0,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.root, self.run)
    }
}

/// Handle returned by the event bus for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
