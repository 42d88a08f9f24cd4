//! `nodebus-core`: primitives shared by every nodebus crate.
//!
//! This crate contains **no dispatch logic**: only identifiers, the error model and the
//! log level scale the bus is configured with.

pub mod error;
pub mod id;
pub mod level;

pub use error::{BroadcastFailure, BusError, BusResult, SubscriberFailure};
pub use id::{EventId, NodeId, NodeType};
pub use level::LogLevel;
