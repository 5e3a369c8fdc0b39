//!
//! Rillflow Core - token-based process execution engine
//!
//! This crate defines process definitions as flow graphs, runs them by
//! moving tokens between flow objects, and persists instance snapshots
//! through a pluggable gateway. Callbacks for activities, gateway
//! decisions, and timer durations are registered per definition in a
//! [`HandlerRegistry`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - process definitions, tokens, history, instances
pub mod domain;

/// Application services - the execution engine and instance registry
pub mod application;

/// Callback registration for process definitions
pub mod handlers;

/// Core types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::EngineError;
pub use types::DataPacket;

pub use domain::events::{DomainEvent, DomainEventHandler, TracingEventHandler};
pub use domain::flow_graph::{
    FlowGraph, FlowObject, FlowObjectId, FlowObjectKind, SequenceFlow, TaskKind,
};
pub use domain::history::{HistoryEntry, HistoryLog};
pub use domain::instance::{
    InstanceId, ParentLink, ProcessInstance, SharedInstance, Signal,
};
pub use domain::persistence::{PersistenceGateway, Snapshot};
pub use domain::process_state::{ProcessState, Token};

pub use application::engine::ExecutionEngine;
pub use application::registry::InstanceRegistry;
pub use handlers::{FallbackNotice, FallbackReason, HandlerRegistry};
