//! `MemoryManager` implementation.
//!
//! # Locking
//!
//! Each tier has its own `parking_lot::Mutex`. Operations that may touch more
//! than one tier acquire the locks strictly in `L1 -> L2 -> L3` order and hold
//! the earlier ones while taking the later ones, so a key can never be
//! observed in two tiers or in none while it is being moved. An L1 hit only
//! takes the L1 lock. Counters are atomics used for statistics only.
//!
//! The eviction listener runs after every tier lock has been released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, trace};

use super::lru::LruTier;
use super::{
    CacheEntry, EvictionNotice, EvictionOutcome, EvictionPolicy, MemoryCounters, MemorySnapshot,
    MemoryStats, Tier,
};
use crate::config::MemoryConfig;
use crate::core::{CoreError, CoreResult, Lifecycle};
use crate::util::clock::{now_ms, system_clock, SharedClock};

/// Callback invoked for every L1 eviction.
pub type EvictionListener = Arc<dyn Fn(&EvictionNotice) + Send + Sync>;

/// L2 entries plus the time of the last sweep.
#[derive(Debug)]
struct TimedTier<V> {
    entries: HashMap<String, CacheEntry<V>>,
    last_sweep: Instant,
}

/// Locks for all three tiers, held together.
struct AllTiers<'a, V> {
    l1: MutexGuard<'a, LruTier<V>>,
    l2: MutexGuard<'a, TimedTier<V>>,
    l3: MutexGuard<'a, HashMap<String, CacheEntry<V>>>,
}

/// Three-tier cache with LRU, TTL and durable tiers.
///
/// Values are cloned out on `get`; stored entries are never handed out by
/// reference.
pub struct MemoryManager<V> {
    l1: Mutex<LruTier<V>>,
    l2: Mutex<TimedTier<V>>,
    l3: Mutex<HashMap<String, CacheEntry<V>>>,
    policy: EvictionPolicy,
    default_ttl: Duration,
    sweep_interval: Duration,
    clock: SharedClock,
    counters: MemoryCounters,
    listener: RwLock<Option<EvictionListener>>,
    running: AtomicBool,
}

impl<V> std::fmt::Debug for MemoryManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("policy", &self.policy)
            .field("default_ttl", &self.default_ttl)
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl<V: Clone> MemoryManager<V> {
    /// Create a manager using the system clock.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn new(config: &MemoryConfig) -> CoreResult<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Create a manager with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn with_clock(config: &MemoryConfig, clock: SharedClock) -> CoreResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            l1: Mutex::new(LruTier::new(config.l1_capacity)),
            l2: Mutex::new(TimedTier {
                entries: HashMap::new(),
                last_sweep: now,
            }),
            l3: Mutex::new(HashMap::new()),
            policy: config.eviction_policy(),
            default_ttl: config.l2_default_ttl(),
            sweep_interval: config.sweep_interval(),
            clock,
            counters: MemoryCounters::default(),
            listener: RwLock::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Register the callback that receives eviction notices, replacing any
    /// previous one.
    pub fn set_eviction_listener(&self, listener: EvictionListener) {
        *self.listener.write() = Some(listener);
    }

    /// Eviction policy in force.
    #[must_use]
    pub const fn eviction_policy(&self) -> EvictionPolicy {
        self.policy
    }

    fn lock_all(&self) -> AllTiers<'_, V> {
        let l1 = self.l1.lock();
        let l2 = self.l2.lock();
        let l3 = self.l3.lock();
        AllTiers { l1, l2, l3 }
    }

    /// Insert or overwrite `key` in `tier`.
    ///
    /// Any copy of the key in another tier is removed first. `ttl` is only
    /// accepted for L2; L2 puts without one get the configured default.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a TTL on L1/L3 or a zero TTL.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: V,
        tier: Tier,
        ttl: Option<Duration>,
    ) -> CoreResult<()> {
        let key = key.into();
        let expires_in = match (tier, ttl) {
            (Tier::L2, Some(ttl)) if ttl.is_zero() => {
                return Err(CoreError::invalid("ttl must be greater than 0"))
            }
            (Tier::L2, ttl) => Some(ttl.unwrap_or(self.default_ttl)),
            (_, Some(_)) => {
                return Err(CoreError::invalid(format!(
                    "ttl is only supported for L2, not {tier}"
                )))
            }
            (_, None) => None,
        };

        let mut notices = Vec::new();
        {
            let mut tiers = self.lock_all();
            let now = self.clock.now();
            tiers.l1.remove(&key);
            tiers.l2.entries.remove(&key);
            tiers.l3.remove(&key);

            let entry = CacheEntry::new(key.clone(), value, tier, now, expires_in.map(|d| now + d));
            match tier {
                Tier::L1 => {
                    if let Some(victim) = tiers.l1.insert(entry) {
                        notices.push(self.evict(victim, &mut tiers, now));
                    }
                }
                Tier::L2 => {
                    tiers.l2.entries.insert(key.clone(), entry);
                }
                Tier::L3 => {
                    tiers.l3.insert(key.clone(), entry);
                }
            }

            if now.saturating_duration_since(tiers.l2.last_sweep) >= self.sweep_interval {
                let expired = Self::sweep_timed(&mut tiers.l2, now);
                MemoryCounters::bump(&self.counters.expirations, expired as u64);
            }
        }
        MemoryCounters::bump(&self.counters.writes, 1);
        trace!(key = %key, tier = %tier, "cache put");
        self.notify(&notices);
        Ok(())
    }

    /// Look up `key`, searching L1, then L2, then L3.
    ///
    /// Hits in L2 or L3 are promoted to L1. Expired entries are removed and
    /// reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut notices = Vec::new();
        let found = self.lookup(key, &mut notices);
        if found.is_some() {
            MemoryCounters::bump(&self.counters.hits, 1);
        } else {
            MemoryCounters::bump(&self.counters.misses, 1);
        }
        self.notify(&notices);
        found
    }

    fn lookup(&self, key: &str, notices: &mut Vec<EvictionNotice>) -> Option<V> {
        let mut l1 = self.l1.lock();
        let now = self.clock.now();

        if let Some(entry) = l1.get_mut(key) {
            if !entry.is_expired(now) {
                entry.touch(now);
                return Some(entry.value.clone());
            }
            l1.remove(key);
            MemoryCounters::bump(&self.counters.expirations, 1);
            debug!(key = %key, "expired entry removed from l1");
            return None;
        }

        let mut l2 = self.l2.lock();
        let mut promoted = match l2.entries.remove(key) {
            Some(entry) if entry.is_expired(now) => {
                MemoryCounters::bump(&self.counters.expirations, 1);
                debug!(key = %key, "expired entry removed from l2");
                return None;
            }
            Some(entry) => entry,
            None => {
                let mut l3 = self.l3.lock();
                let entry = l3.remove(key)?;
                drop(l3);
                entry
            }
        };

        promoted.touch(now);
        promoted.tier = Tier::L1;
        let value = promoted.value.clone();
        trace!(key = %key, from = %promoted.home, "promoted to l1");

        if let Some(victim) = l1.insert(promoted) {
            let l3 = self.l3.lock();
            let mut tiers = AllTiers { l1, l2, l3 };
            notices.push(self.evict(victim, &mut tiers, now));
        }
        Some(value)
    }

    /// Decide where an L1 victim goes. Caller holds every tier lock.
    fn evict(&self, mut victim: CacheEntry<V>, tiers: &mut AllTiers<'_, V>, now: Instant) -> EvictionNotice {
        MemoryCounters::bump(&self.counters.evictions, 1);

        let outcome = match victim.home {
            Tier::L3 => EvictionOutcome::Demoted(Tier::L3),
            Tier::L2 if !victim.is_expired(now) => EvictionOutcome::Demoted(Tier::L2),
            Tier::L2 => EvictionOutcome::Dropped,
            Tier::L1 => match self.policy {
                EvictionPolicy::Demote { grace }
                    if victim.access_count > 0
                        && now.saturating_duration_since(victim.last_access) <= grace =>
                {
                    let deadline = now + grace;
                    victim.expires_at = Some(victim.expires_at.map_or(deadline, |at| at.min(deadline)));
                    EvictionOutcome::Demoted(Tier::L2)
                }
                _ => EvictionOutcome::Dropped,
            },
        };

        let notice = EvictionNotice {
            key: victim.key.clone(),
            outcome,
            access_count: victim.access_count,
        };

        match outcome {
            EvictionOutcome::Demoted(tier) => {
                MemoryCounters::bump(&self.counters.demotions, 1);
                victim.tier = tier;
                if tier == Tier::L3 {
                    tiers.l3.insert(victim.key.clone(), victim);
                } else {
                    tiers.l2.entries.insert(victim.key.clone(), victim);
                }
            }
            EvictionOutcome::Dropped => {}
        }
        debug!(key = %notice.key, outcome = ?notice.outcome, "l1 eviction");
        notice
    }

    fn notify(&self, notices: &[EvictionNotice]) {
        if notices.is_empty() {
            return;
        }
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            for notice in notices {
                listener(notice);
            }
        }
    }

    fn sweep_timed(l2: &mut TimedTier<V>, now: Instant) -> usize {
        let before = l2.entries.len();
        l2.entries.retain(|_, entry| !entry.is_expired(now));
        l2.last_sweep = now;
        before - l2.entries.len()
    }

    /// Remove `key` from whichever tier holds it. Idempotent.
    pub fn remove(&self, key: &str) -> bool {
        let mut tiers = self.lock_all();
        let l1 = tiers.l1.remove(key).is_some();
        let l2 = tiers.l2.entries.remove(key).is_some();
        let l3 = tiers.l3.remove(key).is_some();
        l1 || l2 || l3
    }

    /// Whether an unexpired entry exists, without touching access metadata
    /// or statistics.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.tier_of(key).is_some()
    }

    /// Tier currently holding an unexpired `key`.
    #[must_use]
    pub fn tier_of(&self, key: &str) -> Option<Tier> {
        let tiers = self.lock_all();
        let now = self.clock.now();
        tiers
            .l1
            .peek(key)
            .or_else(|| tiers.l2.entries.get(key))
            .or_else(|| tiers.l3.get(key))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.tier)
    }

    /// Remove every expired entry from L1 and L2, returning how many were
    /// removed.
    pub fn sweep_expired(&self) -> usize {
        let removed = {
            let mut l1 = self.l1.lock();
            let mut l2 = self.l2.lock();
            let now = self.clock.now();
            l1.remove_where(|entry| entry.is_expired(now)) + Self::sweep_timed(&mut l2, now)
        };
        MemoryCounters::bump(&self.counters.expirations, removed as u64);
        if removed > 0 {
            debug!(removed, "expired entries swept");
        }
        removed
    }

    /// Drop every entry in `tier`, returning how many were removed.
    pub fn clear_tier(&self, tier: Tier) -> usize {
        match tier {
            Tier::L1 => self.l1.lock().clear(),
            Tier::L2 => {
                let mut l2 = self.l2.lock();
                let n = l2.entries.len();
                l2.entries.clear();
                n
            }
            Tier::L3 => {
                let mut l3 = self.l3.lock();
                let n = l3.len();
                l3.clear();
                n
            }
        }
    }

    /// Drop every entry in every tier.
    pub fn clear(&self) -> usize {
        let mut tiers = self.lock_all();
        let l2 = tiers.l2.entries.len();
        let l3 = tiers.l3.len();
        tiers.l2.entries.clear();
        tiers.l3.clear();
        tiers.l1.clear() + l2 + l3
    }

    /// Drop the volatile tiers (L1 and L2). L3 is kept as the tier of record.
    pub fn flush(&self) -> usize {
        let mut tiers = self.lock_all();
        let l2 = tiers.l2.entries.len();
        tiers.l2.entries.clear();
        let flushed = tiers.l1.clear() + l2;
        drop(tiers);
        info!(flushed, "volatile cache tiers flushed");
        flushed
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        let mut stats = self.counters.snapshot();
        let tiers = self.lock_all();
        stats.l1_size = tiers.l1.len();
        stats.l1_capacity = tiers.l1.capacity();
        stats.l2_size = tiers.l2.entries.len();
        stats.l3_size = tiers.l3.len();
        stats
    }

    /// Metadata of every stored entry, for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        let stats = self.stats();
        let tiers = self.lock_all();
        let now = self.clock.now();
        let l1 = tiers
            .l1
            .keys_by_recency()
            .iter()
            .filter_map(|key| tiers.l1.peek(key).map(|e| e.info(now)))
            .collect();
        let mut l2: Vec<_> = tiers.l2.entries.values().map(|e| e.info(now)).collect();
        let mut l3: Vec<_> = tiers.l3.values().map(|e| e.info(now)).collect();
        l2.sort_by(|a, b| a.key.cmp(&b.key));
        l3.sort_by(|a, b| a.key.cmp(&b.key));
        MemorySnapshot {
            taken_at_ms: now_ms(),
            l1,
            l2,
            l3,
            stats,
        }
    }
}

impl<V> Lifecycle for MemoryManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "memory"
    }

    fn start(&self) -> CoreResult<()> {
        if !self.running.swap(true, Ordering::AcqRel) {
            info!(policy = ?self.policy, "memory manager started");
        }
        Ok(())
    }

    fn stop(&self) -> CoreResult<()> {
        if self.running.swap(false, Ordering::AcqRel) {
            self.sweep_expired();
            self.flush();
            info!("memory manager stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
