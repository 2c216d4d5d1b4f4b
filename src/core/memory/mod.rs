//! Three-tier memory manager.
//!
//! - **L1**: bounded, least-recently-used.
//! - **L2**: time-bounded; expiry is discovered lazily on access and by sweeps.
//! - **L3**: durable tier of record, no TTL and no capacity pressure.
//!
//! A key lives in exactly one tier. Reads promote L2/L3 hits into L1 and L1
//! overflow moves the victim according to [`EvictionPolicy`]; nothing is ever
//! duplicated across tiers.

mod lru;
mod manager;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub use manager::{EvictionListener, MemoryManager};

/// Cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Fast LRU tier.
    L1,
    /// Time-bounded tier.
    L2,
    /// Durable tier.
    L3,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
            Self::L3 => "l3",
        })
    }
}

/// What happens to an entry that falls out of L1.
///
/// Entries that were promoted into L1 always return to the tier they were
/// put in (L3 entries back to L3, unexpired L2 entries back to L2). The
/// policy decides the fate of entries that were put directly into L1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Discard the victim.
    Drop,
    /// Move the victim to L2 with a TTL of `grace`, provided it has been read
    /// at least once and its last read is no older than `grace`.
    Demote {
        /// Recency window and TTL of the demoted entry.
        grace: Duration,
    },
}

/// Where an evicted entry ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionOutcome {
    /// Re-inserted into the given tier.
    Demoted(Tier),
    /// Discarded.
    Dropped,
}

/// Report of one L1 eviction, handed to the eviction listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionNotice {
    /// Evicted key.
    pub key: String,
    /// Where the entry went.
    pub outcome: EvictionOutcome,
    /// Reads the entry served before eviction.
    pub access_count: u64,
}

/// Stored entry. Never leaves the manager; callers only see cloned values.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub(crate) key: String,
    pub(crate) value: V,
    pub(crate) tier: Tier,
    /// Tier the entry was put into.
    pub(crate) home: Tier,
    pub(crate) inserted_at: Instant,
    pub(crate) expires_at: Option<Instant>,
    pub(crate) last_access: Instant,
    pub(crate) access_count: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) const fn new(
        key: String,
        value: V,
        tier: Tier,
        now: Instant,
        expires_at: Option<Instant>,
    ) -> Self {
        Self {
            key,
            value,
            tier,
            home: tier,
            inserted_at: now,
            expires_at,
            last_access: now,
            access_count: 0,
        }
    }

    /// Expired at or after the expiry instant.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_access = now;
        self.access_count += 1;
    }

    pub(crate) fn info(&self, now: Instant) -> EntryInfo {
        EntryInfo {
            key: self.key.clone(),
            tier: self.tier,
            home: self.home,
            access_count: self.access_count,
            age_ms: duration_ms(now.saturating_duration_since(self.inserted_at)),
            idle_ms: duration_ms(now.saturating_duration_since(self.last_access)),
            ttl_remaining_ms: self
                .expires_at
                .map(|at| duration_ms(at.saturating_duration_since(now))),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Metadata view of a stored entry, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    /// Key.
    pub key: String,
    /// Current tier.
    pub tier: Tier,
    /// Tier the entry was put into.
    pub home: Tier,
    /// Reads served.
    pub access_count: u64,
    /// Time since insertion.
    pub age_ms: u64,
    /// Time since last read (or insertion).
    pub idle_ms: u64,
    /// Time left before expiry, if the entry expires.
    pub ttl_remaining_ms: Option<u64>,
}

/// Snapshot of memory manager statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// `get` calls that returned a value.
    pub hits: u64,
    /// `get` calls that returned nothing (absent or expired).
    pub misses: u64,
    /// `put` calls.
    pub writes: u64,
    /// Entries pushed out of L1.
    pub evictions: u64,
    /// Evicted entries that were re-inserted into a lower tier.
    pub demotions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Entries currently in L1.
    pub l1_size: usize,
    /// L1 capacity.
    pub l1_capacity: usize,
    /// Entries currently in L2.
    pub l2_size: usize,
    /// Entries currently in L3.
    pub l3_size: usize,
}

impl MemoryStats {
    /// `hits / (hits + misses)`, or `0.0` before any access.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Entries across all tiers.
    #[must_use]
    pub const fn total_entries(&self) -> usize {
        self.l1_size + self.l2_size + self.l3_size
    }
}

/// Diagnostic dump of the manager's contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Wall-clock time of the snapshot (ms since epoch).
    pub taken_at_ms: u128,
    /// L1 entries, most recently used first.
    pub l1: Vec<EntryInfo>,
    /// L2 entries.
    pub l2: Vec<EntryInfo>,
    /// L3 entries.
    pub l3: Vec<EntryInfo>,
    /// Counters at snapshot time.
    pub stats: MemoryStats,
}

/// Lock-free statistics counters.
#[derive(Debug, Default)]
pub(crate) struct MemoryCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) writes: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) demotions: AtomicU64,
    pub(crate) expirations: AtomicU64,
}

impl MemoryCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        if by > 0 {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> MemoryStats {
        MemoryStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            ..MemoryStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_without_accesses() {
        assert!(MemoryStats::default().hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn hit_rate_counts_hits_over_accesses() {
        let stats = MemoryStats {
            hits: 3,
            misses: 1,
            ..MemoryStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn entry_expires_at_the_deadline() {
        let now = Instant::now();
        let entry = CacheEntry::new(
            "k".to_owned(),
            1,
            Tier::L2,
            now,
            Some(now + Duration::from_secs(1)),
        );
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + Duration::from_secs(1)));
    }
}
