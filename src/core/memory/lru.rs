//! Capacity-bounded least-recently-used store backing L1.

use std::collections::{BTreeMap, HashMap};

use super::CacheEntry;

/// LRU store with O(log n) recency updates.
///
/// Recency is a monotonically increasing tick per key; `order` maps ticks
/// back to keys so the oldest entry is the first key of the `BTreeMap`.
#[derive(Debug)]
pub(crate) struct LruTier<V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (u64, CacheEntry<V>)>,
    order: BTreeMap<u64, String>,
}

impl<V> LruTier<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: BTreeMap::new(),
        }
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up without changing recency.
    pub(crate) fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(key).map(|(_, entry)| entry)
    }

    /// Look up and mark as most recently used.
    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry<V>> {
        let tick = self.next_tick();
        let (old_tick, entry) = self.entries.get_mut(key)?;
        self.order.remove(old_tick);
        *old_tick = tick;
        self.order.insert(tick, key.to_owned());
        Some(entry)
    }

    /// Insert as most recently used, returning the evicted LRU entry if the
    /// tier went over capacity.
    pub(crate) fn insert(&mut self, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        let tick = self.next_tick();
        let key = entry.key.clone();
        if let Some((old_tick, _)) = self.entries.insert(key.clone(), (tick, entry)) {
            self.order.remove(&old_tick);
        }
        self.order.insert(tick, key);

        if self.entries.len() > self.capacity {
            let (_, victim) = self.order.pop_first()?;
            return self.entries.remove(&victim).map(|(_, entry)| entry);
        }
        None
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let (tick, entry) = self.entries.remove(key)?;
        self.order.remove(&tick);
        Some(entry)
    }

    /// Remove every entry matching `pred`, returning how many were removed.
    pub(crate) fn remove_where(&mut self, mut pred: impl FnMut(&CacheEntry<V>) -> bool) -> usize {
        let doomed: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|(_, (_, entry))| pred(entry))
            .map(|(key, (tick, _))| (*tick, key.clone()))
            .collect();
        for (tick, key) in &doomed {
            self.order.remove(tick);
            self.entries.remove(key);
        }
        doomed.len()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.order.clear();
        n
    }

    /// Keys from most to least recently used.
    pub(crate) fn keys_by_recency(&self) -> Vec<String> {
        self.order.values().rev().cloned().collect()
    }
}
