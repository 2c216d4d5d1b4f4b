//! Ready and delayed task heaps.
//!
//! Eligibility gates priority: a task sits in the delayed heap (ordered by
//! scheduled-at) until its time has come, and only then competes on priority
//! in the ready heap. Cancelled tasks are not removed eagerly; callers skip
//! stale entries when popping, and the scheduler's periodic record purge
//! sweeps the rest out with `retain`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::util::serde::{Priority, TaskId};

/// Queue key shared by both heaps.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueEntry {
    pub(crate) id: TaskId,
    pub(crate) priority: Priority,
    pub(crate) scheduled_at: Instant,
    /// Submission order.
    pub(crate) seq: u64,
}

/// Orders ready entries: highest priority, then earliest scheduled-at, then
/// earliest submission (reversed comparisons for the max-heap).
#[derive(Debug)]
struct Ready(QueueEntry);

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.scheduled_at.cmp(&self.0.scheduled_at))
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Orders delayed entries: earliest scheduled-at first, then submission.
#[derive(Debug)]
struct Delayed(QueueEntry);

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .scheduled_at
            .cmp(&self.0.scheduled_at)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Unbounded two-stage priority queue.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Delayed>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueue, placing the entry according to its eligibility at `now`.
    pub(crate) fn push(&mut self, entry: QueueEntry, now: Instant) {
        if entry.scheduled_at <= now {
            self.ready.push(Ready(entry));
        } else {
            self.delayed.push(Delayed(entry));
        }
    }

    /// Move every delayed entry that has become eligible into the ready heap.
    pub(crate) fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .is_some_and(|Delayed(entry)| entry.scheduled_at <= now)
        {
            if let Some(Delayed(entry)) = self.delayed.pop() {
                self.ready.push(Ready(entry));
            }
        }
    }

    /// Pop the best eligible entry accepted by `is_live`, discarding stale
    /// entries on the way.
    pub(crate) fn pop_ready(&mut self, mut is_live: impl FnMut(&QueueEntry) -> bool) -> Option<QueueEntry> {
        while let Some(Ready(entry)) = self.ready.pop() {
            if is_live(&entry) {
                return Some(entry);
            }
        }
        None
    }

    /// Earliest time a delayed entry becomes eligible.
    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.delayed.peek().map(|Delayed(entry)| entry.scheduled_at)
    }

    /// Drain every entry from both heaps.
    pub(crate) fn drain_all(&mut self) -> Vec<QueueEntry> {
        let mut out: Vec<QueueEntry> = self.ready.drain().map(|Ready(e)| e).collect();
        out.extend(self.delayed.drain().map(|Delayed(e)| e));
        out
    }

    /// Drain only the not-yet-eligible entries.
    pub(crate) fn drain_delayed(&mut self) -> Vec<QueueEntry> {
        self.delayed.drain().map(|Delayed(e)| e).collect()
    }

    /// Keep only the entries accepted by `is_live`, in both heaps.
    pub(crate) fn retain(&mut self, mut is_live: impl FnMut(&QueueEntry) -> bool) {
        self.ready.retain(|Ready(entry)| is_live(entry));
        self.delayed.retain(|Delayed(entry)| is_live(entry));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(seq: u64, priority: Priority, scheduled_at: Instant) -> QueueEntry {
        QueueEntry {
            id: TaskId::generate(),
            priority,
            scheduled_at,
            seq,
        }
    }

    #[test]
    fn test_priority_ordering() {
        let now = Instant::now();
        let mut q = TaskQueue::new();
        q.push(entry(1, Priority::Low, now), now);
        q.push(entry(2, Priority::Critical, now), now);
        q.push(entry(3, Priority::Normal, now), now);
        q.push(entry(4, Priority::High, now), now);

        let order: Vec<u64> = std::iter::from_fn(|| q.pop_ready(|_| true).map(|e| e.seq)).collect();
        assert_eq!(order, vec![2, 4, 3, 1]);
    }

    #[test]
    fn test_ties_break_on_schedule_then_submission() {
        let now = Instant::now();
        let earlier = now - Duration::from_millis(10);
        let mut q = TaskQueue::new();
        q.push(entry(1, Priority::Normal, now), now);
        q.push(entry(2, Priority::Normal, earlier), now);
        q.push(entry(3, Priority::Normal, now), now);

        let order: Vec<u64> = std::iter::from_fn(|| q.pop_ready(|_| true).map(|e| e.seq)).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_ineligible_task_is_not_selected() {
        let now = Instant::now();
        let mut q = TaskQueue::new();
        q.push(entry(1, Priority::Critical, now + Duration::from_secs(60)), now);
        q.push(entry(2, Priority::Low, now), now);

        q.promote_due(now);
        assert_eq!(q.pop_ready(|_| true).map(|e| e.seq), Some(2));
        assert!(q.pop_ready(|_| true).is_none());
        assert_eq!(q.next_due(), Some(now + Duration::from_secs(60)));

        q.promote_due(now + Duration::from_secs(60));
        assert_eq!(q.pop_ready(|_| true).map(|e| e.seq), Some(1));
    }

    #[test]
    fn test_stale_entries_are_skipped() {
        let now = Instant::now();
        let mut q = TaskQueue::new();
        q.push(entry(1, Priority::High, now), now);
        q.push(entry(2, Priority::Low, now), now);
        assert_eq!(q.pop_ready(|e| e.seq != 1).map(|e| e.seq), Some(2));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_retain_drops_dead_entries_from_both_heaps() {
        let now = Instant::now();
        let mut q = TaskQueue::new();
        q.push(entry(1, Priority::Normal, now), now);
        q.push(entry(2, Priority::Normal, now + Duration::from_secs(3_600)), now);
        q.push(entry(3, Priority::Normal, now + Duration::from_secs(7_200)), now);

        q.retain(|e| e.seq == 3);
        assert_eq!(q.len(), 1);
        assert!(q.pop_ready(|_| true).is_none());
        assert_eq!(q.next_due(), Some(now + Duration::from_secs(7_200)));
    }
}
