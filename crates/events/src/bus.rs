//! The bus: registration, dispatch, undo/redo and cross-thread delegation.
//!
//! A [`Bus`] is a cheap handle; clones share one state. The thread that created it is the
//! *owning thread*: handlers only ever run there. A dispatch attempted from another thread is
//! validated and then handed to the installed [`DelegationGateway`], which is expected to feed
//! it back through [`Bus::apply_delegated`] on the owning thread.
//!
//! Every top-level dispatch opens a batch. Inverse records returned by handlers, including the
//! ones of nested dispatches made from inside handlers, are collected into that batch and pushed
//! onto the undo stack as one entry once the outermost call returns.

use std::collections::HashSet;
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::thread::{self, ThreadId};

use nodebus_core::{
    BroadcastFailure, BusError, BusResult, EventId, LogLevel, NodeId, NodeType, SubscriberFailure,
};

use crate::config::BusConfig;
use crate::format::{self, LOG_TARGET};
use crate::gateway::DelegationGateway;
use crate::history::{History, UndoEntry};
use crate::identity::{NodeInfo, NodeRegistry};
use crate::node::NodeBuilder;
use crate::record::{Args, EventRecord, Inverse, Origin, Target};
use crate::reserved::{
    self, X_CLEAR_UNDO_REDO_EVENTS, X_CORE_START, X_MAP_UNDO_REDO_COUNTERS, X_REDO_EVENT,
    X_RELEASE_NODE, X_UNDO_EVENT,
};
use crate::schema::{ParameterDescriptor, SchemaRegistry};
use crate::subscription::{Handler, SubscriptionTable};

/// Outcome of a publish or broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Delivered on the owning thread; one record per handler that ran.
    Applied(Vec<EventRecord>),
    /// Handed to the delegation gateway; handlers run later on the owning thread.
    Delegated,
}

impl Dispatch {
    pub fn records(&self) -> &[EventRecord] {
        match self {
            Self::Applied(records) => records,
            Self::Delegated => &[],
        }
    }

    /// Inverse records produced by the delivered handlers.
    pub fn inverses(&self) -> impl Iterator<Item = &EventRecord> {
        self.records().iter().flat_map(EventRecord::inverses)
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self, Self::Delegated)
    }
}

/// Inverses collected by one (possibly nested) dispatch.
#[derive(Debug)]
struct Frame {
    origin: Origin,
    /// Detached frames (counter notifications) never reach the history.
    recorded: bool,
    inverses: Vec<EventRecord>,
}

impl Frame {
    fn new(origin: Origin, recorded: bool) -> Self {
        Self {
            origin,
            recorded,
            inverses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    /// Join the enclosing batch, or open a fresh one.
    Join,
    /// Always open a new batch for an undo or redo replay.
    Replay(Origin),
    /// Open a batch whose inverses are discarded.
    Detached,
}

enum Opened<'a> {
    Joined(usize),
    New(FrameGuard<'a>),
}

/// Cuts the frame stack back to `depth` when dropped, so a panicking handler cannot leave its
/// frame behind.
struct FrameGuard<'a> {
    frames: &'a Mutex<Vec<Frame>>,
    depth: usize,
}

impl FrameGuard<'_> {
    fn lock(&self) -> MutexGuard<'_, Vec<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the guarded frame off the stack.
    fn pop(self) -> Option<Frame> {
        let mut frames = self.lock();
        frames.truncate(self.depth + 1);
        let frame = if frames.len() > self.depth {
            frames.pop()
        } else {
            None
        };
        drop(frames);
        frame
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.lock().truncate(self.depth);
    }
}

struct BusInner {
    owner: ThreadId,
    schema: RwLock<SchemaRegistry>,
    nodes: Mutex<NodeRegistry>,
    subscriptions: Mutex<SubscriptionTable>,
    history: Mutex<History>,
    frames: Mutex<Vec<Frame>>,
    config: OnceLock<BusConfig>,
    gateway: OnceLock<Arc<dyn DelegationGateway>>,
}

/// Handle to a node bus.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Bus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bus")
            .field("owner", &self.inner.owner)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl Bus {
    /// A fresh bus owned by the calling thread, with the reserved events and the `X_CORE`
    /// node already registered.
    pub fn new() -> Self {
        let mut schema = SchemaRegistry::new();
        reserved::seed_schema(&mut schema);

        let mut nodes = NodeRegistry::new();
        let mut subscriptions = SubscriptionTable::new();
        reserved::seed_core_node(&mut nodes, &mut subscriptions);

        Self {
            inner: Arc::new(BusInner {
                owner: thread::current().id(),
                schema: RwLock::new(schema),
                nodes: Mutex::new(nodes),
                subscriptions: Mutex::new(subscriptions),
                history: Mutex::new(History::new(BusConfig::default().maximum_undo_events)),
                frames: Mutex::new(Vec::new()),
                config: OnceLock::new(),
                gateway: OnceLock::new(),
            }),
        }
    }

    // ----- registration -----

    /// Register an event and its parameters. Only allowed before [`Bus::start`].
    pub fn register_event(
        &self,
        event_id: impl Into<EventId>,
        parameters: impl IntoIterator<Item = ParameterDescriptor>,
        log_level: LogLevel,
    ) -> BusResult<()> {
        if self.is_started() {
            return Err(BusError::AlreadyStarted);
        }
        self.schema_mut()?.register(event_id, parameters, log_level)
    }

    /// Start building a node of `node_type`.
    pub fn node(&self, node_type: impl Into<NodeType>) -> NodeBuilder<'_> {
        NodeBuilder::new(self, node_type.into())
    }

    pub fn lookup(&self, node_id: &NodeId) -> BusResult<NodeInfo> {
        self.nodes()?.lookup(node_id).cloned()
    }

    pub fn is_registered(&self, node_id: &NodeId) -> bool {
        self.nodes().is_ok_and(|nodes| nodes.contains(node_id))
    }

    pub(crate) fn register_node(
        &self,
        node_type: NodeType,
        is_static: bool,
        handlers: Vec<(EventId, Handler)>,
    ) -> BusResult<NodeInfo> {
        if !self.is_owning_thread() {
            return Err(BusError::WrongThread);
        }
        {
            let schema = self.schema()?;
            if let Some((event_id, _)) = handlers.iter().find(|(id, _)| !schema.contains(id)) {
                return Err(BusError::UnknownEvent(event_id.clone()));
            }
        }

        let info = self.nodes()?.register_node(node_type, is_static)?;

        let duplicate = {
            let subscriptions = self.subscriptions()?;
            let mut seen = HashSet::new();
            handlers
                .iter()
                .map(|(id, _)| id)
                .find(|id| !seen.insert(*id) || subscriptions.is_subscribed(id, &info.node_id))
                .cloned()
        };
        if let Some(event_id) = duplicate {
            self.nodes()?.unregister_node(&info.node_id)?;
            return Err(BusError::DuplicateSubscription {
                event_id,
                node_id: info.node_id,
            });
        }

        let mut subscriptions = self.subscriptions()?;
        for (event_id, handler) in handlers {
            subscriptions.push(event_id, info.node_id.clone(), handler);
        }
        tracing::debug!(target: "nodebus", node_id = %info.node_id, is_static, "node registered");
        Ok(info)
    }

    /// Drop every subscription of `node_id` and free its identity.
    ///
    /// Off the owning thread the release is queued through the gateway as `X_RELEASE_NODE`, so it
    /// lands after the dispatches the same thread delegated before it.
    pub(crate) fn release_node(&self, node_id: &NodeId) -> BusResult<()> {
        if !self.is_owning_thread() {
            let core = reserved::core_node_id();
            let record = self.build_record(
                core.clone(),
                EventId::from(X_RELEASE_NODE),
                Target::Node(core),
                &Args::new().with("node_id", node_id.as_str()),
            )?;
            return self.delegate(vec![record], false).map(|_| ());
        }
        self.subscriptions()?.unsubscribe_all(node_id);
        self.nodes()?.unregister_node(node_id)?;
        tracing::debug!(target: "nodebus", node_id = %node_id, "node released");
        Ok(())
    }

    // ----- lifecycle -----

    /// Freeze the configuration, install the gateway and broadcast `X_CORE_START`.
    ///
    /// Must be called on the owning thread, exactly once.
    pub fn start(
        &self,
        config: BusConfig,
        gateway: Option<Arc<dyn DelegationGateway>>,
    ) -> BusResult<()> {
        if !self.is_owning_thread() {
            return Err(BusError::WrongThread);
        }
        config.validate()?;
        let bound = config.maximum_undo_events;
        self.inner
            .config
            .set(config)
            .map_err(|_| BusError::AlreadyStarted)?;
        if let Some(gateway) = gateway {
            self.inner
                .gateway
                .set(gateway)
                .map_err(|_| BusError::AlreadyStarted)?;
        }
        let undo_bound = {
            let mut history = self.history()?;
            history.set_bound(bound);
            history.bound()
        };

        let events = self.schema()?.len();
        tracing::info!(target: "nodebus", events, undo_bound = ?undo_bound, "bus started");
        self.broadcast(X_CORE_START, Args::new()).map(|_| ())
    }

    pub fn is_started(&self) -> bool {
        self.inner.config.get().is_some()
    }

    pub fn config(&self) -> BusResult<&BusConfig> {
        self.inner.config.get().ok_or(BusError::NotStarted)
    }

    pub fn is_owning_thread(&self) -> bool {
        thread::current().id() == self.inner.owner
    }

    // ----- dispatch -----

    /// Publish `event_id` from `X_CORE` to `target`.
    pub fn publish(
        &self,
        event_id: impl Into<EventId>,
        target: impl Into<NodeId>,
        args: Args,
    ) -> BusResult<Dispatch> {
        self.publish_from(reserved::core_node_id(), event_id, target, args)
    }

    /// Publish `event_id` from `sender` to the single node `target`.
    pub fn publish_from(
        &self,
        sender: impl Into<NodeId>,
        event_id: impl Into<EventId>,
        target: impl Into<NodeId>,
        args: Args,
    ) -> BusResult<Dispatch> {
        self.config()?;
        let record = self.build_record(
            sender.into(),
            event_id.into(),
            Target::Node(target.into()),
            &args,
        )?;
        if !self.is_owning_thread() {
            return self.delegate(vec![record], false);
        }
        self.apply_record(record).map(Dispatch::Applied)
    }

    /// Broadcast `event_id` from `X_CORE` to every subscriber.
    pub fn broadcast(&self, event_id: impl Into<EventId>, args: Args) -> BusResult<Dispatch> {
        self.broadcast_from(reserved::core_node_id(), event_id, args)
    }

    /// Broadcast `event_id` from `sender` to every subscriber, in subscription order.
    ///
    /// A failing subscriber does not stop delivery to the others; the failures are returned
    /// together as [`BusError::Broadcast`] and the inverses of the successful ones are kept.
    pub fn broadcast_from(
        &self,
        sender: impl Into<NodeId>,
        event_id: impl Into<EventId>,
        args: Args,
    ) -> BusResult<Dispatch> {
        self.config()?;
        let record = self.build_record(sender.into(), event_id.into(), Target::Broadcast, &args)?;
        if !self.is_owning_thread() {
            return self.delegate(vec![record], false);
        }
        self.apply_record(record).map(Dispatch::Applied)
    }

    /// Replay a batch handed over by the delegation gateway. Owning thread only.
    ///
    /// The whole batch forms one undo entry; with `is_undo` it is treated as an undo replay and
    /// its inverses land on the redo stack. Stops at the first failing record.
    pub fn apply_delegated(&self, events: Vec<EventRecord>, is_undo: bool) -> BusResult<()> {
        if !self.is_owning_thread() {
            return Err(BusError::WrongThread);
        }
        self.config()?;
        let scope = if is_undo {
            Scope::Replay(Origin::Undo)
        } else {
            Scope::Join
        };
        let result = self.within_frame(scope, || {
            for record in events {
                self.apply_record(record)?;
            }
            Ok(())
        });
        // An undo batch lands on the redo stack without going through `replay`.
        if is_undo {
            self.notify_counters();
        }
        result
    }

    // ----- undo / redo -----

    /// Replay the inverses of the most recent action.
    pub fn undo(&self) -> BusResult<()> {
        self.config()?;
        if !self.is_owning_thread() {
            return self.delegate_to_core(X_UNDO_EVENT);
        }
        self.replay(Origin::Undo)
    }

    /// Replay the inverses of the most recent undo.
    pub fn redo(&self) -> BusResult<()> {
        self.config()?;
        if !self.is_owning_thread() {
            return self.delegate_to_core(X_REDO_EVENT);
        }
        self.replay(Origin::Redo)
    }

    /// Empty both history stacks.
    pub fn clear_history(&self) -> BusResult<()> {
        self.config()?;
        if !self.is_owning_thread() {
            return self.delegate_to_core(X_CLEAR_UNDO_REDO_EVENTS);
        }
        if self.replay_in_progress()? {
            return Err(BusError::ReplayInProgress);
        }
        self.history()?.clear();
        self.notify_counters();
        Ok(())
    }

    /// Push `inverses`, as if `node_id` had just handled an action, as one undo entry.
    ///
    /// Invalidates the redo stack. Owning thread only.
    pub fn add_undo_entry(&self, node_id: impl Into<NodeId>, inverses: Vec<Inverse>) -> BusResult<()> {
        self.config()?;
        if !self.is_owning_thread() {
            return Err(BusError::WrongThread);
        }
        let node_id = node_id.into();
        self.nodes()?.lookup(&node_id)?;

        let records = inverses
            .into_iter()
            .map(|inverse| self.inverse_record(&node_id, inverse))
            .collect::<BusResult<Vec<_>>>()?;
        let entry = UndoEntry::new(records);
        if entry.is_empty() {
            return Ok(());
        }
        self.history()?.record(entry);
        self.notify_counters();
        Ok(())
    }

    pub fn undo_depth(&self) -> BusResult<usize> {
        Ok(self.history()?.undo_depth())
    }

    pub fn redo_depth(&self) -> BusResult<usize> {
        Ok(self.history()?.redo_depth())
    }

    // ----- internals -----

    fn build_record(
        &self,
        sender: NodeId,
        event_id: EventId,
        target: Target,
        args: &Args,
    ) -> BusResult<EventRecord> {
        let ordered = self.schema()?.validate(&event_id, args)?;
        Ok(EventRecord::new(event_id, sender, target, ordered))
    }

    fn inverse_record(&self, node_id: &NodeId, inverse: Inverse) -> BusResult<EventRecord> {
        let (event_id, args) = inverse.into_parts();
        self.build_record(node_id.clone(), event_id, Target::Node(node_id.clone()), &args)
    }

    fn delegate(&self, events: Vec<EventRecord>, is_undo: bool) -> BusResult<Dispatch> {
        let gateway = self.inner.gateway.get().ok_or(BusError::WrongThread)?;
        tracing::debug!(target: "nodebus", count = events.len(), is_undo, "delegating to the owning thread");
        gateway.delegate_events(events, is_undo);
        Ok(Dispatch::Delegated)
    }

    fn delegate_to_core(&self, event_id: &str) -> BusResult<()> {
        let core = reserved::core_node_id();
        let record = EventRecord::new(
            EventId::from(event_id),
            core.clone(),
            Target::Node(core),
            Vec::new(),
        );
        self.delegate(vec![record], false).map(|_| ())
    }

    /// Sender and target must be live, and the target subscribed.
    fn resolve_target(&self, record: &EventRecord, target: &NodeId) -> BusResult<Handler> {
        {
            let nodes = self.nodes()?;
            nodes.lookup(record.sender())?;
            nodes.lookup(target)?;
        }
        self.subscriptions()?.resolve(record.event_id(), target)
    }

    fn apply_record(&self, record: EventRecord) -> BusResult<Vec<EventRecord>> {
        match record.target().clone() {
            Target::Node(target) => {
                let handler = self.resolve_target(&record, &target)?;
                self.within_frame(Scope::Join, || {
                    self.deliver(record, &target, &handler, true).map(|r| vec![r])
                })
            }
            Target::Broadcast => {
                self.nodes()?.lookup(record.sender())?;
                self.apply_broadcast(record, Scope::Join)
            }
        }
    }

    fn apply_broadcast(&self, record: EventRecord, scope: Scope) -> BusResult<Vec<EventRecord>> {
        let subscribers = self.subscriptions()?.resolve_all(record.event_id());
        if subscribers.is_empty() {
            if !matches!(scope, Scope::Detached) {
                tracing::warn!(
                    target: LOG_TARGET,
                    "node '{}' broadcast event '{}', but it echoed in the void",
                    record.sender(),
                    record.event_id()
                );
            }
            return Ok(Vec::new());
        }

        self.within_frame(scope, || {
            // One line for the broadcast itself, none per subscriber.
            let mut announced = record.clone();
            announced.set_origin(self.current_origin()?);
            self.log_dispatch(&announced)?;

            let mut delivered = Vec::with_capacity(subscribers.len());
            let mut failures = Vec::new();
            for (node_id, handler) in &subscribers {
                let copy = record.clone().with_target(Target::Node(node_id.clone()));
                match self.deliver(copy, node_id, handler, false) {
                    Ok(delivered_record) => delivered.push(delivered_record),
                    Err(error) => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            node_id = %node_id,
                            event_id = %record.event_id(),
                            "broadcast subscriber failed: {error}"
                        );
                        failures.push(SubscriberFailure {
                            node_id: node_id.clone(),
                            error,
                        });
                    }
                }
            }
            if failures.is_empty() {
                Ok(delivered)
            } else {
                Err(BusError::Broadcast(BroadcastFailure::new(
                    record.event_id().clone(),
                    failures,
                )))
            }
        })
    }

    /// Run the handler with no lock held and collect its inverses into the open batch.
    fn deliver(
        &self,
        mut record: EventRecord,
        node_id: &NodeId,
        handler: &Handler,
        log: bool,
    ) -> BusResult<EventRecord> {
        record.set_origin(self.current_origin()?);
        if log {
            self.log_dispatch(&record)?;
        }

        let produced = (**handler)(self, &record).map_err(|source| BusError::Handler {
            event_id: record.event_id().clone(),
            node_id: node_id.clone(),
            source,
        })?;

        let inverses = produced
            .into_iter()
            .map(|inverse| self.inverse_record(node_id, inverse))
            .collect::<BusResult<Vec<_>>>()
            .map_err(|err| BusError::Handler {
                event_id: record.event_id().clone(),
                node_id: node_id.clone(),
                source: anyhow::Error::new(err).context("handler returned an invalid inverse"),
            })?;

        if let Some(frame) = self.frames()?.last_mut() {
            frame.inverses.extend(inverses.iter().cloned());
        }
        record.set_inverses(inverses);
        Ok(record)
    }

    fn log_dispatch(&self, record: &EventRecord) -> BusResult<()> {
        let Some(config) = self.inner.config.get() else {
            return Ok(());
        };
        let (descriptor, width) = {
            let schema = self.schema()?;
            (schema.descriptor(record.event_id())?, schema.longest_id())
        };
        if descriptor.log_level().passes(config.log_level) {
            let line = format::dispatch_line(record, &descriptor, config, width);
            format::emit(descriptor.log_level(), &line);
        }
        Ok(())
    }

    fn current_origin(&self) -> BusResult<Origin> {
        Ok(self
            .frames()?
            .last()
            .map_or(Origin::Normal, |frame| frame.origin))
    }

    fn replay_in_progress(&self) -> BusResult<bool> {
        Ok(self.frames()?.iter().any(|frame| frame.origin.is_replay()))
    }

    /// Run `f` inside a batch and route the collected inverses once the batch closes.
    ///
    /// A joined call that fails (other than a partial broadcast) drops whatever it added to the
    /// enclosing batch. A fresh batch is committed when `f` succeeds, when a broadcast partially
    /// failed, or when it is a replay (so a half-applied replay can still be reversed).
    fn within_frame<T>(&self, scope: Scope, f: impl FnOnce() -> BusResult<T>) -> BusResult<T> {
        let opened = {
            let mut frames = self.frames()?;
            let fresh = match (scope, frames.last()) {
                (Scope::Join, Some(_)) => None,
                (Scope::Join, None) => Some(Frame::new(Origin::Normal, true)),
                (Scope::Replay(origin), _) => Some(Frame::new(origin, true)),
                (Scope::Detached, _) => Some(Frame::new(Origin::Normal, false)),
            };
            match fresh {
                Some(frame) => {
                    let guard = FrameGuard {
                        frames: &self.inner.frames,
                        depth: frames.len(),
                    };
                    frames.push(frame);
                    Opened::New(guard)
                }
                None => Opened::Joined(frames.last().map_or(0, |top| top.inverses.len())),
            }
        };

        let result = f();

        match opened {
            Opened::Joined(mark) => {
                if discards(&result, Origin::Normal) {
                    if let Some(top) = self.frames()?.last_mut() {
                        top.inverses.truncate(mark);
                    }
                }
            }
            Opened::New(guard) => {
                if let Some(frame) = guard.pop() {
                    if frame.recorded && !discards(&result, frame.origin) {
                        self.commit(frame)?;
                    }
                }
            }
        }
        result
    }

    fn commit(&self, frame: Frame) -> BusResult<()> {
        let origin = frame.origin;
        let entry = UndoEntry::new(frame.inverses);
        if entry.is_empty() {
            return Ok(());
        }
        {
            let mut history = self.history()?;
            match origin {
                Origin::Normal => history.record(entry),
                Origin::Undo => history.push_redo(entry),
                Origin::Redo => history.push_undo(entry),
            }
        }
        // Replays announce the new sizes themselves once they are done.
        if origin == Origin::Normal {
            self.notify_counters();
        }
        Ok(())
    }

    fn replay(&self, origin: Origin) -> BusResult<()> {
        if self.replay_in_progress()? {
            return Err(BusError::ReplayInProgress);
        }
        let entry = {
            let mut history = self.history()?;
            match origin {
                Origin::Undo => history.pop_undo()?,
                _ => history.pop_redo()?,
            }
        };

        let resolvable = entry.replay_order().try_for_each(|record| match record.target() {
            Target::Node(target) => self.resolve_target(record, target).map(|_| ()),
            Target::Broadcast => Ok(()),
        });
        if let Err(err) = resolvable {
            let mut history = self.history()?;
            match origin {
                Origin::Undo => history.restore_undo(entry),
                _ => history.restore_redo(entry),
            }
            return Err(err);
        }

        tracing::debug!(target: "nodebus", ?origin, records = entry.len(), "replaying history entry");
        let result = self.within_frame(Scope::Replay(origin), || {
            for record in entry.replay_order() {
                self.apply_record(record.for_replay(origin))?;
            }
            Ok(())
        });
        self.notify_counters();
        result
    }

    /// Broadcast the current stack sizes as `X_MAP_UNDO_REDO_COUNTERS`.
    fn notify_counters(&self) {
        let result = self
            .history()
            .map(|history| (history.undo_depth(), history.redo_depth()))
            .and_then(|(undo, redo)| {
                let args = Args::new()
                    .with("undo_counter", undo)
                    .with("redo_counter", redo);
                let record = self.build_record(
                    reserved::core_node_id(),
                    EventId::from(X_MAP_UNDO_REDO_COUNTERS),
                    Target::Broadcast,
                    &args,
                )?;
                self.apply_broadcast(record, Scope::Detached)
            });
        if let Err(err) = result {
            tracing::warn!(target: "nodebus", "failed to publish undo/redo counters: {err}");
        }
    }

    // ----- locks -----

    fn schema(&self) -> BusResult<RwLockReadGuard<'_, SchemaRegistry>> {
        self.inner.schema.read().map_err(|_| BusError::Poisoned)
    }

    fn schema_mut(&self) -> BusResult<RwLockWriteGuard<'_, SchemaRegistry>> {
        self.inner.schema.write().map_err(|_| BusError::Poisoned)
    }

    fn nodes(&self) -> BusResult<MutexGuard<'_, NodeRegistry>> {
        self.inner.nodes.lock().map_err(|_| BusError::Poisoned)
    }

    fn subscriptions(&self) -> BusResult<MutexGuard<'_, SubscriptionTable>> {
        self.inner.subscriptions.lock().map_err(|_| BusError::Poisoned)
    }

    fn history(&self) -> BusResult<MutexGuard<'_, History>> {
        self.inner.history.lock().map_err(|_| BusError::Poisoned)
    }

    fn frames(&self) -> BusResult<MutexGuard<'_, Vec<Frame>>> {
        self.inner.frames.lock().map_err(|_| BusError::Poisoned)
    }
}

fn discards<T>(result: &BusResult<T>, origin: Origin) -> bool {
    match result {
        Ok(_) | Err(BusError::Broadcast(_)) => false,
        Err(_) => !origin.is_replay(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reserved::X_CORE_NODE_ID;
    use crate::schema::ParamType;
    use std::io;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicI64, Ordering};

    fn bus_with_set_value() -> Bus {
        let bus = Bus::new();
        bus.register_event(
            "SET_VALUE",
            [ParameterDescriptor::typed("value", ParamType::integer())],
            LogLevel::Debug,
        )
        .unwrap();
        bus
    }

    fn counter(bus: &Bus, value: Arc<AtomicI64>) -> crate::Node {
        bus.node("COUNTER")
            .static_node()
            .on("SET_VALUE", move |_bus, record| {
                let new: i64 = record.arg_as("value")?;
                let old = value.swap(new, Ordering::SeqCst);
                Ok(vec![Inverse::new("SET_VALUE").arg("value", old)])
            })
            .register()
            .unwrap()
    }

    /// In-memory sink for `tracing_subscriber::fmt`.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(str::to_owned)
                .collect()
        }
    }

    #[test]
    fn core_node_and_reserved_events_exist() {
        let bus = Bus::new();
        let core = bus.lookup(&NodeId::from(X_CORE_NODE_ID)).unwrap();
        assert!(core.is_static);
        assert!(matches!(
            bus.register_event(X_UNDO_EVENT, Vec::new(), LogLevel::Info),
            Err(BusError::DuplicateEvent(_))
        ));
    }

    #[test]
    fn dispatch_before_start_fails() {
        let bus = bus_with_set_value();
        let value = Arc::new(AtomicI64::new(0));
        let _counter = counter(&bus, value);
        let err = bus
            .publish("SET_VALUE", "COUNTER", Args::new().with("value", 1))
            .unwrap_err();
        assert!(matches!(err, BusError::NotStarted));
    }

    #[test]
    fn registering_events_after_start_fails() {
        let bus = Bus::new();
        bus.start(BusConfig::default(), None).unwrap();
        assert!(matches!(
            bus.register_event("LATE", Vec::new(), LogLevel::Info),
            Err(BusError::AlreadyStarted)
        ));
        assert!(matches!(
            bus.start(BusConfig::default(), None),
            Err(BusError::AlreadyStarted)
        ));
    }

    #[test]
    fn invalid_configuration_does_not_start() {
        let bus = Bus::new();
        let err = bus
            .start(BusConfig::default().with_id_maximum_logging_length(2), None)
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidConfiguration(_)));
        assert!(!bus.is_started());
    }

    #[test]
    fn publish_records_one_undo_entry() {
        let bus = bus_with_set_value();
        let value = Arc::new(AtomicI64::new(0));
        let _counter = counter(&bus, Arc::clone(&value));
        bus.start(BusConfig::default(), None).unwrap();

        let dispatch = bus
            .publish("SET_VALUE", "COUNTER", Args::new().with("value", 5))
            .unwrap();
        assert_eq!(dispatch.records().len(), 1);
        assert_eq!(dispatch.inverses().count(), 1);
        assert_eq!(value.load(Ordering::SeqCst), 5);
        assert_eq!(bus.undo_depth().unwrap(), 1);

        bus.undo().unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 0);
        assert_eq!(bus.undo_depth().unwrap(), 0);
        assert_eq!(bus.redo_depth().unwrap(), 1);

        bus.redo().unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 5);
        assert_eq!(bus.undo_depth().unwrap(), 1);
        assert_eq!(bus.redo_depth().unwrap(), 0);
    }

    #[test]
    fn failing_handler_records_nothing() {
        let bus = bus_with_set_value();
        let _node = bus
            .node("BROKEN")
            .static_node()
            .on("SET_VALUE", |_bus, _record| anyhow::bail!("refused"))
            .register()
            .unwrap();
        bus.start(BusConfig::default(), None).unwrap();

        let err = bus
            .publish("SET_VALUE", "BROKEN", Args::new().with("value", 1))
            .unwrap_err();
        assert!(matches!(err, BusError::Handler { .. }));
        assert_eq!(bus.undo_depth().unwrap(), 0);
    }

    #[test]
    fn nested_dispatch_joins_the_outer_entry() {
        let bus = bus_with_set_value();
        bus.register_event("RESET_ALL", Vec::new(), LogLevel::Info)
            .unwrap();
        let value = Arc::new(AtomicI64::new(3));
        let _counter = counter(&bus, Arc::clone(&value));
        let _resetter = bus
            .node("RESETTER")
            .static_node()
            .on("RESET_ALL", |bus, _record| {
                bus.publish("SET_VALUE", "COUNTER", Args::new().with("value", 0))?;
                Ok(Vec::new())
            })
            .register()
            .unwrap();
        bus.start(BusConfig::default(), None).unwrap();

        bus.publish("RESET_ALL", "RESETTER", Args::new()).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 0);
        assert_eq!(bus.undo_depth().unwrap(), 1);

        bus.undo().unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn invalid_inverse_is_a_handler_error() {
        let bus = bus_with_set_value();
        let _node = bus
            .node("SLOPPY")
            .static_node()
            .on("SET_VALUE", |_bus, _record| {
                Ok(vec![Inverse::new("SET_VALUE").arg("value", "not a number")])
            })
            .register()
            .unwrap();
        bus.start(BusConfig::default(), None).unwrap();

        let err = bus
            .publish("SET_VALUE", "SLOPPY", Args::new().with("value", 1))
            .unwrap_err();
        assert!(matches!(err, BusError::Handler { .. }));
        assert_eq!(bus.undo_depth().unwrap(), 0);
    }

    #[test]
    fn undo_inside_a_replay_is_rejected() {
        let bus = bus_with_set_value();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_handler = Arc::clone(&seen);
        let _node = bus
            .node("REENTRANT")
            .static_node()
            .on("SET_VALUE", move |bus, record| {
                if record.origin().is_replay() {
                    *seen_in_handler.lock().unwrap() = Some(bus.undo().is_err());
                }
                Ok(vec![Inverse::new("SET_VALUE").arg("value", 0)])
            })
            .register()
            .unwrap();
        bus.start(BusConfig::default(), None).unwrap();

        bus.publish("SET_VALUE", "REENTRANT", Args::new().with("value", 1))
            .unwrap();
        bus.undo().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn add_undo_entry_clears_redo() {
        let bus = bus_with_set_value();
        let value = Arc::new(AtomicI64::new(0));
        let _counter = counter(&bus, Arc::clone(&value));
        bus.start(BusConfig::default(), None).unwrap();

        bus.publish("SET_VALUE", "COUNTER", Args::new().with("value", 1))
            .unwrap();
        bus.undo().unwrap();
        assert_eq!(bus.redo_depth().unwrap(), 1);

        bus.add_undo_entry("COUNTER", vec![Inverse::new("SET_VALUE").arg("value", 9)])
            .unwrap();
        assert_eq!(bus.redo_depth().unwrap(), 0);
        assert_eq!(bus.undo_depth().unwrap(), 1);

        bus.undo().unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn clear_history_empties_both_stacks() {
        let bus = bus_with_set_value();
        let value = Arc::new(AtomicI64::new(0));
        let _counter = counter(&bus, value);
        bus.start(BusConfig::default(), None).unwrap();

        for v in 1..=3 {
            bus.publish("SET_VALUE", "COUNTER", Args::new().with("value", v))
                .unwrap();
        }
        bus.undo().unwrap();
        bus.clear_history().unwrap();
        assert_eq!(bus.undo_depth().unwrap(), 0);
        assert_eq!(bus.redo_depth().unwrap(), 0);
        assert!(matches!(bus.undo(), Err(BusError::EmptyUndoStack)));
    }

    #[test]
    fn undo_can_be_requested_through_the_core_node() {
        let bus = bus_with_set_value();
        let value = Arc::new(AtomicI64::new(0));
        let _counter = counter(&bus, Arc::clone(&value));
        bus.start(BusConfig::default(), None).unwrap();

        bus.publish("SET_VALUE", "COUNTER", Args::new().with("value", 4))
            .unwrap();
        bus.publish(X_UNDO_EVENT, X_CORE_NODE_ID, Args::new()).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 0);
        assert_eq!(bus.redo_depth().unwrap(), 1);

        bus.publish(X_REDO_EVENT, X_CORE_NODE_ID, Args::new()).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn delegated_undo_batch_announces_counters() {
        let bus = bus_with_set_value();
        let value = Arc::new(AtomicI64::new(0));
        let _counter = counter(&bus, Arc::clone(&value));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = Arc::clone(&seen);
        let _display = bus
            .node("DISPLAY")
            .on(X_MAP_UNDO_REDO_COUNTERS, move |_bus, record| {
                let undo: usize = record.arg_as("undo_counter")?;
                let redo: usize = record.arg_as("redo_counter")?;
                seen_in_handler.lock().unwrap().push((undo, redo));
                Ok(Vec::new())
            })
            .register()
            .unwrap();
        bus.start(BusConfig::default(), None).unwrap();

        let dispatch = bus
            .publish("SET_VALUE", "COUNTER", Args::new().with("value", 6))
            .unwrap();
        let inverses: Vec<EventRecord> = dispatch.inverses().cloned().collect();
        seen.lock().unwrap().clear();

        bus.apply_delegated(inverses, true).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 0);
        assert_eq!(bus.redo_depth().unwrap(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 1)]);
    }

    #[test]
    fn broadcast_is_logged_once() {
        let bus = Bus::new();
        bus.register_event("REFRESH", Vec::new(), LogLevel::Info)
            .unwrap();
        let views: Vec<_> = ["VIEW_A", "VIEW_B"]
            .into_iter()
            .map(|name| {
                bus.node(name)
                    .static_node()
                    .on("REFRESH", |_bus, _record| Ok(Vec::new()))
                    .register()
                    .unwrap()
            })
            .collect();
        bus.start(BusConfig::default(), None).unwrap();

        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let dispatch = bus.broadcast("REFRESH", Args::new()).unwrap();
            assert_eq!(dispatch.records().len(), views.len());
        });

        let lines = captured.lines();
        assert_eq!(
            lines.iter().filter(|line| line.contains("-> BROADCAST")).count(),
            1
        );
        assert!(!lines.iter().any(|line| line.contains("-> VIEW_")));
    }

    #[test]
    fn panicking_handler_leaves_no_open_batch() {
        let bus = bus_with_set_value();
        bus.register_event("EXPLODE", Vec::new(), LogLevel::Info)
            .unwrap();
        let value = Arc::new(AtomicI64::new(0));
        let _counter = counter(&bus, Arc::clone(&value));
        let _bomb = bus
            .node("BOMB")
            .static_node()
            .on("EXPLODE", |_bus, _record| panic!("boom"))
            .register()
            .unwrap();
        bus.start(BusConfig::default(), None).unwrap();

        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            bus.publish("EXPLODE", "BOMB", Args::new())
        }));
        assert!(caught.is_err());

        bus.publish("SET_VALUE", "COUNTER", Args::new().with("value", 2))
            .unwrap();
        assert_eq!(bus.undo_depth().unwrap(), 1);
        bus.undo().unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 0);
    }
}
