//! Topology Listener Fan-out
//!
//! Subscribers observe join/leave/leader events derived from a channel's
//! view changes. Subscriptions are logical: one multiplexer per channel, any
//! number of listeners per multiplexer.

use crate::membership::ViewDiff;

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callbacks run on the view-delivery task of the channel and must not block.
pub trait TopologyListener: Send + Sync {
    fn on_join(&self, _zone: &str, _runtime: &str) {}

    fn on_leave(&self, _zone: &str, _runtime: &str) {}

    fn on_leader_elected(&self, _zone: &str, _runtime: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerMultiplexer {
    listeners: DashMap<ListenerId, Arc<dyn TopologyListener>>,
    next_id: AtomicU64,
}

impl ListenerMultiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, listener: Arc<dyn TopologyListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        id
    }

    pub fn deregister(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Notifies every listener of `diff`: leaves first, then joins, then
    /// leader changes. Members without a zone (controllers) are not reported.
    pub fn dispatch(&self, diff: &ViewDiff) {
        if diff.is_empty() || self.listeners.is_empty() {
            return;
        }
        // Snapshot so listeners may (de)register from inside a callback.
        let listeners: Vec<Arc<dyn TopologyListener>> = self
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for member in &diff.leaves {
            if let Some(zone) = member.zone() {
                for listener in &listeners {
                    listener.on_leave(zone, member.runtime_name());
                }
            }
        }
        for member in &diff.joins {
            if let Some(zone) = member.zone() {
                for listener in &listeners {
                    listener.on_join(zone, member.runtime_name());
                }
            }
        }
        for member in &diff.new_leaders {
            if let Some(zone) = member.zone() {
                for listener in &listeners {
                    listener.on_leader_elected(zone, member.runtime_name());
                }
            }
        }
    }
}
