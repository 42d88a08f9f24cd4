//! Events and the node the bus registers for itself.

use std::sync::Arc;

use nodebus_core::{EventId, LogLevel, NodeId, NodeType};

use crate::identity::{NodeInfo, NodeRegistry};
use crate::schema::{self, ParamType, ParameterDescriptor, SchemaRegistry};
use crate::subscription::{Handler, SubscriptionTable};

/// Id of the bus's own static node.
pub const X_CORE_NODE_ID: &str = "X_CORE";

/// Lifecycle broadcast, fired once by [`crate::Bus::start`].
pub const X_CORE_START: &str = "X_CORE_START";
/// Request to undo the last action (handled by `X_CORE`).
pub const X_UNDO_EVENT: &str = "X_UNDO_EVENT";
/// Request to redo the last undone action (handled by `X_CORE`).
pub const X_REDO_EVENT: &str = "X_REDO_EVENT";
/// Request to clear both history stacks (handled by `X_CORE`).
pub const X_CLEAR_UNDO_REDO_EVENTS: &str = "X_CLEAR_UNDO_REDO_EVENTS";
/// Broadcast after every change of the history sizes.
pub const X_MAP_UNDO_REDO_COUNTERS: &str = "X_MAP_UNDO_REDO_COUNTERS";
/// A node dropped off the owning thread, queued behind that thread's earlier dispatches.
pub const X_RELEASE_NODE: &str = "X_RELEASE_NODE";

pub(crate) fn core_node_id() -> NodeId {
    NodeId::from(X_CORE_NODE_ID)
}

pub(crate) fn seed_schema(registry: &mut SchemaRegistry) {
    for id in [X_CORE_START, X_UNDO_EVENT, X_REDO_EVENT, X_CLEAR_UNDO_REDO_EVENTS] {
        registry.insert(schema::descriptor(id, Vec::new(), LogLevel::Info));
    }
    registry.insert(schema::descriptor(
        X_MAP_UNDO_REDO_COUNTERS,
        vec![
            ParameterDescriptor::typed("undo_counter", ParamType::integer())
                .describe("Number of undo entries."),
            ParameterDescriptor::typed("redo_counter", ParamType::integer())
                .describe("Number of redo entries."),
        ],
        LogLevel::Info,
    ));
    registry.insert(schema::descriptor(
        X_RELEASE_NODE,
        vec![ParameterDescriptor::typed("node_id", ParamType::string())
            .describe("Id of the node to release.")],
        LogLevel::Debug,
    ));
}

pub(crate) fn seed_core_node(nodes: &mut NodeRegistry, subscriptions: &mut SubscriptionTable) {
    let node_id = core_node_id();
    nodes.insert(NodeInfo {
        node_id: node_id.clone(),
        node_type: NodeType::from(X_CORE_NODE_ID),
        is_static: true,
    });

    let undo: Handler = Arc::new(|bus, _| {
        bus.undo()?;
        Ok(Vec::new())
    });
    let redo: Handler = Arc::new(|bus, _| {
        bus.redo()?;
        Ok(Vec::new())
    });
    let clear: Handler = Arc::new(|bus, _| {
        bus.clear_history()?;
        Ok(Vec::new())
    });
    let release: Handler = Arc::new(|bus, record| {
        let node_id: String = record.arg_as("node_id")?;
        bus.release_node(&NodeId::from(node_id))?;
        Ok(Vec::new())
    });

    subscriptions.push(EventId::from(X_UNDO_EVENT), node_id.clone(), undo);
    subscriptions.push(EventId::from(X_REDO_EVENT), node_id.clone(), redo);
    subscriptions.push(EventId::from(X_CLEAR_UNDO_REDO_EVENTS), node_id.clone(), clear);
    subscriptions.push(EventId::from(X_RELEASE_NODE), node_id, release);
}
