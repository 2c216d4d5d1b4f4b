//! Status models reported by the runtime façade.

use serde::{Deserialize, Serialize};

use crate::core::{BusStats, MemoryStats, SchedulerStats};

/// Boot sequence stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootStage {
    /// Configuration validated, services built.
    Init,
    /// Memory manager started.
    Memory,
    /// Event bus started.
    Bus,
    /// Scheduler started.
    Scheduler,
    /// Default wiring done, system ready.
    Ready,
    /// A required step failed.
    Failed,
}

impl std::fmt::Display for BootStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Memory => "memory",
            Self::Bus => "bus",
            Self::Scheduler => "scheduler",
            Self::Ready => "ready",
            Self::Failed => "failed",
        })
    }
}

/// One executed boot step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootStep {
    /// Human-readable step name.
    pub name: String,
    /// Stage the step belongs to.
    pub stage: BootStage,
    /// Whether a failure aborts boot.
    pub required: bool,
    /// Wall time spent in the step.
    pub duration_ms: u64,
    /// Failure message, if the step failed.
    pub error: Option<String>,
}

/// Liveness of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// Service name.
    pub name: String,
    /// Whether it is started.
    pub running: bool,
}

/// Snapshot returned by `Runtime::status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    /// Crate version.
    pub version: String,
    /// Current boot stage.
    pub stage: BootStage,
    /// Boot start (ms since epoch).
    pub booted_at_ms: u128,
    /// Time from boot start to ready.
    pub boot_duration_ms: u64,
    /// Whether `shutdown` has run.
    pub shut_down: bool,
    /// Executed boot steps in order.
    pub steps: Vec<BootStep>,
    /// Services in start order.
    pub components: Vec<ComponentStatus>,
    /// Errors from optional boot steps.
    pub errors: Vec<String>,
    /// Memory manager counters.
    pub memory: MemoryStats,
    /// Event bus counters.
    pub bus: BusStats,
    /// Scheduler counters.
    pub scheduler: SchedulerStats,
}
