//! In-process event bus for nodes with typed events, undo/redo and single-thread dispatch.
//!
//! - Events are registered up front with named, optionally typed parameters
//! - Nodes subscribe handlers; handlers return the inverse events that undo them
//! - Every top-level dispatch becomes one undo entry
//! - Handlers always run on the thread that created the [`Bus`]

pub mod bus;
pub mod config;
pub mod format;
pub mod gateway;
pub mod history;
pub mod identity;
pub mod node;
pub mod record;
pub mod reserved;
pub mod schema;
pub mod subscription;

pub use bus::{Bus, Dispatch};
pub use config::BusConfig;
pub use gateway::{DelegatedBatch, DelegationGateway, DrainReport, QueueGateway};
pub use history::UndoEntry;
pub use identity::NodeInfo;
pub use node::{Node, NodeBuilder};
pub use record::{Args, Argument, EventRecord, Inverse, Origin, Target};
pub use reserved::{
    X_CLEAR_UNDO_REDO_EVENTS, X_CORE_NODE_ID, X_CORE_START, X_MAP_UNDO_REDO_COUNTERS,
    X_REDO_EVENT, X_RELEASE_NODE, X_UNDO_EVENT,
};
pub use schema::{EventDescriptor, ParamType, ParameterDescriptor};
pub use subscription::{Handler, HandlerResult};

pub use nodebus_core::{
    BroadcastFailure, BusError, BusResult, EventId, LogLevel, NodeId, NodeType, SubscriberFailure,
};
