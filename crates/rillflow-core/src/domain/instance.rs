use crate::domain::events::DomainEvent;
use crate::domain::flow_graph::FlowGraph;
use crate::domain::history::HistoryLog;
use crate::domain::process_state::ProcessState;
use crate::handlers::HandlerRegistry;
use crate::types::DataPacket;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Value object: process instance ID.
///
/// Nested instances derive their ID from the parent's by appending the
/// call activity name, so the whole tree shares one recognizable prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Create an instance ID from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The ID of the nested instance a call activity spawns
    pub fn nested(&self, call_activity: &str) -> InstanceId {
        InstanceId(format!("{}::{}", self.0, call_activity))
    }

    /// View as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Back-reference from a nested instance to the waiting parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// The parent instance
    pub instance_id: InstanceId,
    /// Name of the call activity (and of the parent token position)
    /// waiting on this instance
    pub token_position: String,
}

/// A unit of work delivered to a process instance.
///
/// While the instance is persisting, incoming signals are queued on the
/// instance and replayed in arrival order once the write completes.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Start the instance at the named start event
    Start {
        /// Name of the start event
        event_name: String,
        /// Initial business data
        data: DataPacket,
    },
    /// A token arrived at a flow object
    TokenArrived {
        /// Name of the flow object
        position: String,
    },
    /// An externally completed activity was signaled finished
    ActivityFinished {
        /// Name of the activity
        name: String,
        /// Optional data update carried by the completion
        data: Option<DataPacket>,
    },
    /// A boundary timer elapsed
    TimerFired {
        /// Name of the boundary event
        boundary: String,
        /// Name of the interrupted activity
        activity: String,
    },
}

/// A live boundary timer. Dropping or cancelling aborts the underlying
/// task; a fire signal from an aborted task never arrives.
#[derive(Debug)]
pub struct BoundaryTimer {
    /// Registration ID, checked when the fire signal comes back so a
    /// stale fire from a cancelled timer is ignored
    pub registration_id: String,
    /// Name of the activity the boundary event is attached to
    pub attached_to: String,
    handle: JoinHandle<()>,
}

impl BoundaryTimer {
    /// Wrap a spawned timer task
    pub fn new(
        registration_id: impl Into<String>,
        attached_to: impl Into<String>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            registration_id: registration_id.into(),
            attached_to: attached_to.into(),
            handle,
        }
    }

    /// Cancel the timer
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

/// A running process instance: one definition, one handler registry,
/// tokens, history, and business data.
///
/// Instances are shared as `Arc<tokio::sync::Mutex<ProcessInstance>>`;
/// all mutation happens under that lock.
pub struct ProcessInstance {
    /// Instance identifier
    pub id: InstanceId,
    /// The definition this instance executes
    pub graph: Arc<FlowGraph>,
    /// Handlers for this instance's scope
    pub handlers: Arc<HandlerRegistry>,
    /// Token multiset
    pub state: ProcessState,
    /// Visit log
    pub history: HistoryLog,
    /// Business data
    pub data: DataPacket,
    /// Present on nested instances
    pub parent: Option<ParentLink>,
    /// Live boundary timers, keyed by boundary event name
    pub active_timers: HashMap<String, BoundaryTimer>,

    deferring: bool,
    deferred: VecDeque<Signal>,
    events: Vec<Box<dyn DomainEvent>>,

    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the instance last changed
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for ProcessInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessInstance")
            .field("id", &self.id)
            .field("definition", &self.graph.id())
            .field("state", &self.state)
            .field("deferring", &self.deferring)
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

impl ProcessInstance {
    /// Create a fresh instance with no tokens and empty data
    pub fn new(
        id: InstanceId,
        graph: Arc<FlowGraph>,
        handlers: Arc<HandlerRegistry>,
        parent: Option<ParentLink>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            graph,
            handlers,
            state: ProcessState::new(),
            history: HistoryLog::new(),
            data: DataPacket::object(),
            parent,
            active_timers: HashMap::new(),
            deferring: false,
            deferred: VecDeque::new(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a domain event for later dispatch
    pub fn record_event(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
        self.updated_at = Utc::now();
    }

    /// Drain recorded events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }

    /// Whether signals are currently being deferred
    pub fn is_deferring(&self) -> bool {
        self.deferring
    }

    /// Start deferring incoming signals while a persist is in flight
    pub fn begin_deferring(&mut self) {
        self.deferring = true;
    }

    /// Queue a signal for replay after the persist completes. Only
    /// valid while deferring.
    pub fn defer(&mut self, signal: Signal) {
        self.deferred.push_back(signal);
    }

    /// Stop deferring and hand back the queued signals in arrival order
    pub fn end_deferring(&mut self) -> Vec<Signal> {
        self.deferring = false;
        self.deferred.drain(..).collect()
    }

    /// Cancel every live boundary timer attached to the given activity,
    /// returning the names of the cancelled boundary events
    pub fn cancel_timers_for(&mut self, activity: &str) -> Vec<String> {
        let boundaries: Vec<String> = self
            .active_timers
            .iter()
            .filter(|(_, timer)| timer.attached_to == activity)
            .map(|(boundary, _)| boundary.clone())
            .collect();
        for boundary in &boundaries {
            if let Some(timer) = self.active_timers.remove(boundary) {
                timer.cancel();
            }
        }
        boundaries
    }

    /// Cancel every live boundary timer
    pub fn cancel_all_timers(&mut self) {
        for (_, timer) in self.active_timers.drain() {
            timer.cancel();
        }
    }
}

/// Shared handle to a process instance
pub type SharedInstance = Arc<tokio::sync::Mutex<ProcessInstance>>;
