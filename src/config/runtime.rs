//! Runtime configuration structures.
//!
//! Every tunable has a documented default, so an empty mapping is a valid
//! configuration. Values arrive from JSON ([`RuntimeConfig::from_json_str`]),
//! a flat `section.name -> value` mapping ([`RuntimeConfig::from_map`]) or the
//! process environment ([`RuntimeConfig::from_env`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::memory::EvictionPolicy;
use crate::core::{CoreError, CoreResult};
use crate::util::serde::Priority;

/// Environment variable prefix read by [`RuntimeConfig::from_env`].
pub const ENV_PREFIX: &str = "SAGCO_";

/// What happens to entries evicted from L1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    /// Re-insert recently read entries into L2.
    #[default]
    Demote,
    /// Discard evicted entries.
    Drop,
}

/// Memory manager tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of L1 entries.
    pub l1_capacity: usize,
    /// TTL applied to L2 puts that carry none.
    pub l2_default_ttl_ms: u64,
    /// L1 eviction behaviour.
    pub eviction_policy: EvictionMode,
    /// Window within which an evicted entry must have been read to be demoted.
    pub demotion_grace_ms: u64,
    /// Minimum spacing of put-triggered L2 sweeps, also the period of the
    /// recurring sweep task.
    pub sweep_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1000,
            l2_default_ttl_ms: 300_000,
            eviction_policy: EvictionMode::Demote,
            demotion_grace_ms: 300_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl MemoryConfig {
    /// Validate memory values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for any zero capacity or duration.
    pub fn validate(&self) -> CoreResult<()> {
        if self.l1_capacity == 0 {
            return Err(CoreError::invalid("memory.l1_capacity must be greater than 0"));
        }
        if self.l2_default_ttl_ms == 0 {
            return Err(CoreError::invalid("memory.l2_default_ttl_ms must be greater than 0"));
        }
        if self.demotion_grace_ms == 0 {
            return Err(CoreError::invalid("memory.demotion_grace_ms must be greater than 0"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(CoreError::invalid("memory.sweep_interval_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Default L2 TTL.
    #[must_use]
    pub const fn l2_default_ttl(&self) -> Duration {
        Duration::from_millis(self.l2_default_ttl_ms)
    }

    /// Sweep interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Resolved eviction policy.
    #[must_use]
    pub const fn eviction_policy(&self) -> EvictionPolicy {
        match self.eviction_policy {
            EvictionMode::Demote => EvictionPolicy::Demote {
                grace: Duration::from_millis(self.demotion_grace_ms),
            },
            EvictionMode::Drop => EvictionPolicy::Drop,
        }
    }
}

/// Event bus tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Number of events retained in the diagnostic history ring.
    pub history_size: usize,
    /// Priority given to subscriptions that do not name one.
    pub default_priority: Priority,
    /// How long `stop` lets queued events drain before dropping them.
    pub shutdown_grace_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_size: 1000,
            default_priority: Priority::Normal,
            shutdown_grace_ms: 500,
        }
    }
}

impl BusConfig {
    /// Validate bus values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the history ring has no room.
    pub fn validate(&self) -> CoreResult<()> {
        if self.history_size == 0 {
            return Err(CoreError::invalid("bus.history_size must be greater than 0"));
        }
        Ok(())
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Scheduler tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads in the pool.
    pub workers: usize,
    /// Upper bound on how long `stop` waits for in-flight tasks.
    pub shutdown_timeout_ms: u64,
    /// How long terminal task records are kept when nobody takes them.
    pub result_retention_ms: u64,
    /// Stack size for each worker thread in bytes.
    pub thread_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            shutdown_timeout_ms: 5_000,
            result_retention_ms: 600_000,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with `workers` threads.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Validate scheduler values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero worker count, timeout or stack size.
    pub fn validate(&self) -> CoreResult<()> {
        if self.workers == 0 {
            return Err(CoreError::invalid("scheduler.workers must be greater than 0"));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(CoreError::invalid(
                "scheduler.shutdown_timeout_ms must be greater than 0",
            ));
        }
        if self.result_retention_ms == 0 {
            return Err(CoreError::invalid(
                "scheduler.result_retention_ms must be greater than 0",
            ));
        }
        if self.thread_stack_size == 0 {
            return Err(CoreError::invalid("scheduler.thread_stack_size must be greater than 0"));
        }
        Ok(())
    }

    /// Shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Result retention window.
    #[must_use]
    pub const fn result_retention(&self) -> Duration {
        Duration::from_millis(self.result_retention_ms)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Memory manager section.
    pub memory: MemoryConfig,
    /// Event bus section.
    pub bus: BusConfig,
    /// Scheduler section.
    pub scheduler: SchedulerConfig,
}

impl RuntimeConfig {
    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidArgument` found.
    pub fn validate(&self) -> CoreResult<()> {
        self.memory.validate()?;
        self.bus.validate()?;
        self.scheduler.validate()
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on malformed JSON or invalid values.
    pub fn from_json_str(input: &str) -> CoreResult<Self> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| CoreError::invalid(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from a flat `section.name -> value` mapping.
    ///
    /// Omitted keys keep their defaults. `scheduler.workers` accepts `auto`
    /// for one worker per logical CPU.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for unknown keys, unparsable values or
    /// values that fail validation.
    pub fn from_map<I, K, V>(entries: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut cfg = Self::default();
        for (key, value) in entries {
            cfg.apply(key.as_ref(), value.as_ref())?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `SAGCO_<SECTION>_<NAME>` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    ///
    /// # Errors
    ///
    /// Same as [`RuntimeConfig::from_map`].
    pub fn from_env() -> CoreResult<Self> {
        let _ = dotenvy::dotenv();
        let entries = std::env::vars().filter_map(|(name, value)| {
            let rest = name.strip_prefix(ENV_PREFIX)?.to_ascii_lowercase();
            let (section, field) = rest.split_once('_')?;
            Some((format!("{section}.{field}"), value))
        });
        Self::from_map(entries)
    }

    fn apply(&mut self, key: &str, value: &str) -> CoreResult<()> {
        let value = value.trim();
        match key {
            "memory.l1_capacity" => self.memory.l1_capacity = parse(key, value)?,
            "memory.l2_default_ttl_ms" => self.memory.l2_default_ttl_ms = parse(key, value)?,
            "memory.eviction_policy" => {
                self.memory.eviction_policy = match value.to_ascii_lowercase().as_str() {
                    "demote" => EvictionMode::Demote,
                    "drop" => EvictionMode::Drop,
                    other => {
                        return Err(CoreError::invalid(format!(
                            "{key}: unknown eviction policy `{other}`"
                        )))
                    }
                };
            }
            "memory.demotion_grace_ms" => self.memory.demotion_grace_ms = parse(key, value)?,
            "memory.sweep_interval_ms" => self.memory.sweep_interval_ms = parse(key, value)?,
            "bus.history_size" => self.bus.history_size = parse(key, value)?,
            "bus.default_priority" => self.bus.default_priority = value.parse()?,
            "bus.shutdown_grace_ms" => self.bus.shutdown_grace_ms = parse(key, value)?,
            "scheduler.workers" => {
                self.scheduler.workers = if value.eq_ignore_ascii_case("auto") {
                    num_cpus::get()
                } else {
                    parse(key, value)?
                };
            }
            "scheduler.shutdown_timeout_ms" => {
                self.scheduler.shutdown_timeout_ms = parse(key, value)?;
            }
            "scheduler.result_retention_ms" => {
                self.scheduler.result_retention_ms = parse(key, value)?;
            }
            "scheduler.thread_stack_size" => self.scheduler.thread_stack_size = parse(key, value)?,
            unknown => {
                return Err(CoreError::invalid(format!("unknown configuration key `{unknown}`")))
            }
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> CoreResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| CoreError::invalid(format!("{key}: `{value}` ({e})")))
}
