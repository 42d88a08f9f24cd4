//! Bus error model.

use core::fmt;

use thiserror::Error;

use crate::id::{EventId, NodeId, NodeType};

/// Result type used across the bus.
pub type BusResult<T> = Result<T, BusError>;

/// Bus-level error.
///
/// Every error is local to the call that produced it. Registration and dispatch errors are
/// raised before anything is mutated or any handler runs; handler errors carry the failing
/// node so the caller can tell which participant misbehaved.
#[derive(Debug, Error)]
pub enum BusError {
    /// An event id was registered twice.
    #[error("attempted to register event '{0}' twice")]
    DuplicateEvent(EventId),

    /// Two parameters of one event share a name.
    #[error("attempted to register event '{event_id}', but parameter '{parameter}' is configured twice")]
    DuplicateParameter { event_id: EventId, parameter: String },

    /// A static node type already has a live node.
    #[error("static node '{0}' is already registered")]
    DuplicateStaticNode(NodeType),

    /// A node id is already live.
    #[error("a node with id '{0}' is already registered")]
    DuplicateNode(NodeId),

    /// The (event, node) pair already has a handler.
    #[error("node '{node_id}' is already subscribed to event '{event_id}'")]
    DuplicateSubscription { event_id: EventId, node_id: NodeId },

    /// The event id is not registered.
    #[error("event '{0}' is not registered")]
    UnknownEvent(EventId),

    /// The node id is not live.
    #[error("node '{0}' is not registered")]
    UnknownNode(NodeId),

    /// Arguments do not match the event's parameters.
    #[error("event '{event_id}' cannot be constructed: {detail}")]
    ParameterMismatch { event_id: EventId, detail: String },

    /// The target node has no handler for the event.
    #[error("node '{node_id}' is not subscribed to event '{event_id}'")]
    NotSubscribed { event_id: EventId, node_id: NodeId },

    /// A handler returned an error.
    #[error("node '{node_id}' failed to handle event '{event_id}': {source}")]
    Handler {
        event_id: EventId,
        node_id: NodeId,
        #[source]
        source: anyhow::Error,
    },

    /// One or more broadcast subscribers failed; the others were still delivered to.
    #[error(transparent)]
    Broadcast(BroadcastFailure),

    #[error("nothing to undo")]
    EmptyUndoStack,

    #[error("nothing to redo")]
    EmptyRedoStack,

    /// An undo or redo was requested while another one is replaying.
    #[error("an undo/redo replay is already in progress")]
    ReplayInProgress,

    /// A dispatch was attempted off the owning thread with no gateway installed.
    #[error("attempted to dispatch outside of the owning thread, with no delegation gateway installed")]
    WrongThread,

    #[error("the bus has not been started")]
    NotStarted,

    #[error("the bus has already been started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal lock poisoning.
    #[error("bus state lock poisoned")]
    Poisoned,
}

impl BusError {
    pub fn parameter_mismatch(event_id: &EventId, detail: impl Into<String>) -> Self {
        Self::ParameterMismatch {
            event_id: event_id.clone(),
            detail: detail.into(),
        }
    }

    pub fn not_subscribed(event_id: &EventId, node_id: &NodeId) -> Self {
        Self::NotSubscribed {
            event_id: event_id.clone(),
            node_id: node_id.clone(),
        }
    }

    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Registration errors: the call had no effect.
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateEvent(_)
                | Self::DuplicateParameter { .. }
                | Self::DuplicateStaticNode(_)
                | Self::DuplicateNode(_)
                | Self::DuplicateSubscription { .. }
        )
    }

    /// Dispatch errors: raised before any handler ran.
    pub fn is_dispatch(&self) -> bool {
        matches!(
            self,
            Self::UnknownEvent(_)
                | Self::UnknownNode(_)
                | Self::ParameterMismatch { .. }
                | Self::NotSubscribed { .. }
        )
    }
}

/// A single subscriber's failure during a broadcast.
#[derive(Debug)]
pub struct SubscriberFailure {
    pub node_id: NodeId,
    pub error: BusError,
}

/// All subscriber failures of one broadcast, in delivery order.
#[derive(Debug)]
pub struct BroadcastFailure {
    event_id: EventId,
    failures: Vec<SubscriberFailure>,
}

impl BroadcastFailure {
    pub fn new(event_id: EventId, failures: Vec<SubscriberFailure>) -> Self {
        Self { event_id, failures }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn failures(&self) -> &[SubscriberFailure] {
        &self.failures
    }

    /// Ids of the failing subscribers.
    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.failures.iter().map(|f| &f.node_id)
    }
}

impl fmt::Display for BroadcastFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "broadcast of event '{}' failed for {} subscriber(s)",
            self.event_id,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "; '{}': {}", failure.node_id, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BroadcastFailure {}
