//! Subscription table entries and delivery targets.

use std::sync::Arc;

use crossbeam_channel::Sender;

use super::event::{Event, TopicPattern};
use crate::util::serde::{Priority, SubscriptionId};

/// Callback invoked for every matching event.
///
/// Errors and panics are contained by the dispatcher; they never stop
/// delivery to other subscribers.
pub type Handler<P> = Arc<dyn Fn(&Event<P>) -> anyhow::Result<()> + Send + Sync>;

/// Where matching events are delivered.
pub(crate) enum Target<P> {
    Callback(Handler<P>),
    Channel(Sender<Arc<Event<P>>>),
}

pub(crate) struct Subscription<P> {
    pub(crate) id: SubscriptionId,
    pub(crate) pattern: TopicPattern,
    pub(crate) priority: Priority,
    pub(crate) target: Target<P>,
}

impl<P> Subscription<P> {
    pub(crate) fn deliver(&self, event: &Arc<Event<P>>) -> anyhow::Result<()> {
        match &self.target {
            Target::Callback(handler) => handler(event),
            Target::Channel(tx) => tx
                .send(Arc::clone(event))
                .map_err(|_| anyhow::anyhow!("subscriber channel closed")),
        }
    }
}

/// Public description of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionInfo {
    /// Handle.
    pub id: SubscriptionId,
    /// Pattern as written.
    pub pattern: String,
    /// Delivery priority.
    pub priority: Priority,
}

/// Subscriptions ordered for delivery: priority descending, then insertion
/// order (ids are allocated monotonically).
pub(crate) struct SubscriptionTable<P> {
    entries: Vec<Arc<Subscription<P>>>,
}

impl<P> SubscriptionTable<P> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, sub: Subscription<P>) {
        let pos = self
            .entries
            .partition_point(|existing| existing.priority >= sub.priority);
        self.entries.insert(pos, Arc::new(sub));
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|sub| sub.id != id);
        self.entries.len() != before
    }

    pub(crate) fn matching(&self, topic: &str) -> Vec<Arc<Subscription<P>>> {
        self.entries
            .iter()
            .filter(|sub| sub.pattern.matches(topic))
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn infos(&self) -> Vec<SubscriptionInfo> {
        self.entries
            .iter()
            .map(|sub| SubscriptionInfo {
                id: sub.id,
                pattern: sub.pattern.to_string(),
                priority: sub.priority,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: u64, priority: Priority) -> Subscription<()> {
        Subscription {
            id: SubscriptionId(id),
            pattern: TopicPattern::All,
            priority,
            target: Target::Callback(Arc::new(|_| Ok(()))),
        }
    }

    #[test]
    fn orders_by_priority_then_insertion() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, Priority::Normal));
        table.insert(sub(2, Priority::Critical));
        table.insert(sub(3, Priority::Normal));
        table.insert(sub(4, Priority::Low));
        table.insert(sub(5, Priority::Critical));
        let order: Vec<u64> = table.matching("any").iter().map(|s| s.id.0).collect();
        assert_eq!(order, vec![2, 5, 1, 3, 4]);
    }

    #[test]
    fn remove_reports_presence() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, Priority::Normal));
        assert!(table.remove(SubscriptionId(1)));
        assert!(!table.remove(SubscriptionId(1)));
        assert_eq!(table.len(), 0);
    }
}
