//! Subscription table: event id → (node id → handler).

use std::collections::HashMap;
use std::sync::Arc;

use nodebus_core::{BusError, BusResult, EventId, NodeId};

use crate::bus::Bus;
use crate::record::{EventRecord, Inverse};

/// What a handler returns: the inverses that undo its effect, or an error.
pub type HandlerResult = anyhow::Result<Vec<Inverse>>;

/// A bound event handler.
///
/// Handlers run synchronously on the owning thread and receive the bus so they can publish
/// follow-up events.
pub type Handler = Arc<dyn Fn(&Bus, &EventRecord) -> HandlerResult + Send + Sync>;

#[derive(Default)]
pub struct SubscriptionTable {
    by_event: HashMap<EventId, Vec<(NodeId, Handler)>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, event_id: EventId, node_id: NodeId, handler: Handler) -> BusResult<()> {
        if self.is_subscribed(&event_id, &node_id) {
            return Err(BusError::DuplicateSubscription { event_id, node_id });
        }
        self.push(event_id, node_id, handler);
        Ok(())
    }

    pub(crate) fn push(&mut self, event_id: EventId, node_id: NodeId, handler: Handler) {
        self.by_event.entry(event_id).or_default().push((node_id, handler));
    }

    /// Remove every subscription of `node_id`; returns how many were removed.
    pub fn unsubscribe_all(&mut self, node_id: &NodeId) -> usize {
        let mut removed = 0;
        self.by_event.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|(id, _)| id != node_id);
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });
        removed
    }

    /// Subscribers of an event, in registration order.
    pub fn resolve_all(&self, event_id: &EventId) -> Vec<(NodeId, Handler)> {
        self.by_event.get(event_id).cloned().unwrap_or_default()
    }

    /// The single handler of `target` for `event_id`.
    pub fn resolve(&self, event_id: &EventId, target: &NodeId) -> BusResult<Handler> {
        self.by_event
            .get(event_id)
            .and_then(|subscribers| subscribers.iter().find(|(id, _)| id == target))
            .map(|(_, handler)| Arc::clone(handler))
            .ok_or_else(|| BusError::not_subscribed(event_id, target))
    }

    pub fn is_subscribed(&self, event_id: &EventId, node_id: &NodeId) -> bool {
        self.by_event
            .get(event_id)
            .is_some_and(|subscribers| subscribers.iter().any(|(id, _)| id == node_id))
    }

    pub fn subscriber_count(&self, event_id: &EventId) -> usize {
        self.by_event.get(event_id).map_or(0, Vec::len)
    }
}

impl core::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (event_id, subscribers) in &self.by_event {
            let ids: Vec<&NodeId> = subscribers.iter().map(|(id, _)| id).collect();
            map.entry(event_id, &ids);
        }
        map.finish()
    }
}
