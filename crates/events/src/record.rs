//! Event records: the unit the bus dispatches, logs, and keeps on its history stacks.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nodebus_core::{EventId, NodeId};

/// Why a record is being dispatched.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A fresh publish/broadcast.
    #[default]
    Normal,
    /// Replayed from the undo stack.
    Undo,
    /// Replayed from the redo stack.
    Redo,
}

impl Origin {
    pub fn is_replay(self) -> bool {
        !matches!(self, Origin::Normal)
    }
}

/// Where a record is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "node_id", rename_all = "snake_case")]
pub enum Target {
    Node(NodeId),
    /// Every subscriber of the event.
    Broadcast,
}

impl Target {
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Target::Node(id) => Some(id),
            Target::Broadcast => None,
        }
    }
}

/// Named argument values supplied by a caller.
///
/// The order in which arguments are added does not matter: the bus normalizes them into the
/// event's declared parameter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Vec<(String, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an argument.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One validated argument of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

/// A dispatched (or to-be-replayed) event.
///
/// Arguments are stored in the event's declared parameter order. `inverses` holds the records
/// the handler returned when this record was delivered; it is empty for records that have not
/// been delivered yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    event_id: EventId,
    sender: NodeId,
    target: Target,
    args: Vec<Argument>,
    origin: Origin,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inverses: Vec<EventRecord>,
    recorded_at: DateTime<Utc>,
}

impl EventRecord {
    pub(crate) fn new(event_id: EventId, sender: NodeId, target: Target, args: Vec<Argument>) -> Self {
        Self {
            event_id,
            sender,
            target,
            args,
            origin: Origin::Normal,
            inverses: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn sender(&self) -> &NodeId {
        &self.sender
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn inverses(&self) -> &[EventRecord] {
        &self.inverses
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Arguments in declared parameter order.
    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    /// Deserialize an argument into `T`.
    pub fn arg_as<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .arg(name)
            .ok_or_else(|| anyhow::anyhow!("event '{}' has no argument '{name}'", self.event_id))?;
        serde_json::from_value(value.clone()).map_err(|e| {
            anyhow::anyhow!("argument '{name}' of event '{}': {e}", self.event_id)
        })
    }

    pub(crate) fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub(crate) fn set_origin(&mut self, origin: Origin) {
        self.origin = origin;
    }

    pub(crate) fn set_inverses(&mut self, inverses: Vec<EventRecord>) {
        self.inverses = inverses;
    }

    /// A copy ready to be dispatched again: no inverses, fresh timestamp.
    pub(crate) fn for_replay(&self, origin: Origin) -> Self {
        Self {
            event_id: self.event_id.clone(),
            sender: self.sender.clone(),
            target: self.target.clone(),
            args: self.args.clone(),
            origin,
            inverses: Vec::new(),
            recorded_at: Utc::now(),
        }
    }
}

/// What a handler returns to describe how to reverse its effect.
///
/// The bus turns every inverse into an [`EventRecord`] addressed to the handling node.
#[derive(Debug, Clone, PartialEq)]
pub struct Inverse {
    event_id: EventId,
    args: Args,
}

impl Inverse {
    pub fn new(event_id: impl Into<EventId>) -> Self {
        Self {
            event_id: event_id.into(),
            args: Args::new(),
        }
    }

    pub fn with_args(event_id: impl Into<EventId>, args: Args) -> Self {
        Self {
            event_id: event_id.into(),
            args,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name, value);
        self
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub(crate) fn into_parts(self) -> (EventId, Args) {
        (self.event_id, self.args)
    }
}
