//! Nodes: a registered identity plus its event handlers.

use std::sync::Arc;

use nodebus_core::{BusResult, EventId, NodeId, NodeType};

use crate::bus::{Bus, Dispatch};
use crate::identity::NodeInfo;
use crate::record::{Args, EventRecord};
use crate::subscription::{Handler, HandlerResult};

/// Collects the handlers of a node before it joins the bus.
///
/// ```ignore
/// let counter = bus
///     .node("COUNTER")
///     .static_node()
///     .on("SET_VALUE", |_bus, record| { /* ... */ Ok(vec![]) })
///     .register()?;
/// ```
pub struct NodeBuilder<'a> {
    bus: &'a Bus,
    node_type: NodeType,
    is_static: bool,
    handlers: Vec<(EventId, Handler)>,
}

impl<'a> NodeBuilder<'a> {
    pub(crate) fn new(bus: &'a Bus, node_type: NodeType) -> Self {
        Self {
            bus,
            node_type,
            is_static: false,
            handlers: Vec::new(),
        }
    }

    /// At most one live node of this type; its id is the type name.
    pub fn static_node(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Subscribe to `event_id` with `handler`.
    pub fn on<F>(mut self, event_id: impl Into<EventId>, handler: F) -> Self
    where
        F: Fn(&Bus, &EventRecord) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.push((event_id.into(), Arc::new(handler)));
        self
    }

    /// Allocate the node's identity and subscribe its handlers.
    ///
    /// Fails without side effects if an event is unknown, a subscription is repeated, or the
    /// identity clashes with a live node.
    pub fn register(self) -> BusResult<Node> {
        let info = self
            .bus
            .register_node(self.node_type, self.is_static, self.handlers)?;
        Ok(Node {
            bus: self.bus.clone(),
            info,
        })
    }
}

/// A live node. Dropping it unsubscribes it and frees its id; off the owning thread the release
/// is queued through the gateway.
#[derive(Debug)]
pub struct Node {
    bus: Bus,
    info: NodeInfo,
}

impl Node {
    pub fn id(&self) -> &NodeId {
        &self.info.node_id
    }

    pub fn node_type(&self) -> &NodeType {
        &self.info.node_type
    }

    pub fn is_static(&self) -> bool {
        self.info.is_static
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    /// Publish `event_id` from this node to `target`.
    pub fn publish(
        &self,
        event_id: impl Into<EventId>,
        target: impl Into<NodeId>,
        args: Args,
    ) -> BusResult<Dispatch> {
        self.bus
            .publish_from(self.info.node_id.clone(), event_id, target, args)
    }

    /// Broadcast `event_id` from this node.
    pub fn broadcast(&self, event_id: impl Into<EventId>, args: Args) -> BusResult<Dispatch> {
        self.bus
            .broadcast_from(self.info.node_id.clone(), event_id, args)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Err(err) = self.bus.release_node(&self.info.node_id) {
            tracing::warn!(target: "nodebus", node_id = %self.info.node_id, "failed to release node: {err}");
        }
    }
}
