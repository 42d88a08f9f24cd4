//! Node identity registry.
//!
//! Holds a non-owning index entry per live node. The node itself owns its lifetime and must
//! release its slot on destruction (the [`crate::Node`] handle does so on drop).

use std::collections::HashMap;

use serde::Serialize;

use nodebus_core::{BusError, BusResult, NodeId, NodeType};

/// Index entry of a live node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub is_static: bool,
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, NodeInfo>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identity for a node of `node_type`.
    ///
    /// Static nodes use the type name as id and at most one can be live at a time.
    pub fn register_node(&mut self, node_type: impl Into<NodeType>, is_static: bool) -> BusResult<NodeInfo> {
        let node_type = node_type.into();
        let node_id = if is_static {
            NodeId::for_static(&node_type)
        } else {
            NodeId::generate(&node_type)
        };

        if let Some(existing) = self.nodes.get(&node_id) {
            return Err(if existing.is_static && is_static {
                BusError::DuplicateStaticNode(node_type)
            } else {
                BusError::DuplicateNode(node_id)
            });
        }

        let info = NodeInfo {
            node_id,
            node_type,
            is_static,
        };
        self.insert(info.clone());
        Ok(info)
    }

    pub(crate) fn insert(&mut self, info: NodeInfo) {
        self.nodes.insert(info.node_id.clone(), info);
    }

    /// Free the slot of `node_id`.
    pub fn unregister_node(&mut self, node_id: &NodeId) -> BusResult<NodeInfo> {
        self.nodes
            .remove(node_id)
            .ok_or_else(|| BusError::UnknownNode(node_id.clone()))
    }

    pub fn lookup(&self, node_id: &NodeId) -> BusResult<&NodeInfo> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| BusError::UnknownNode(node_id.clone()))
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
