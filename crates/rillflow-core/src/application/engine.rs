//! Signal-driven execution over a flow graph.
//!
//! The engine owns no instance state of its own; it looks instances up
//! in the [`InstanceRegistry`], mutates them under their per-instance
//! lock, and never holds two instance locks at once. Handlers and the
//! persistence gateway are always awaited with all locks released, so a
//! slow store or callback cannot wedge unrelated instances.

use crate::application::registry::InstanceRegistry;
use crate::domain::events::{
    ActivityCompleted, DomainEventHandler, InstanceCompleted, InstanceStarted, TimerArmed,
    TimerCancelled, TimerFired, TokenEntered, TracingEventHandler,
};
use crate::domain::flow_graph::{FlowGraph, FlowObjectKind};
use crate::domain::history::HistoryLog;
use crate::domain::instance::{BoundaryTimer, InstanceId, ParentLink, SharedInstance, Signal};
use crate::domain::persistence::{PersistenceGateway, Snapshot};
use crate::domain::process_state::ProcessState;
use crate::error::EngineError;
use crate::handlers::{FallbackNotice, FallbackReason, HandlerRegistry};
use crate::types::DataPacket;
use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Token-based process execution engine.
///
/// Cheap to clone; clones share the registry, the persistence gateway
/// and the domain event observer.
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<InstanceRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    event_handler: Arc<dyn DomainEventHandler>,
}

impl ExecutionEngine {
    /// Create an engine over the given registry and persistence gateway
    pub fn new(registry: Arc<InstanceRegistry>, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            registry,
            gateway,
            event_handler: Arc::new(TracingEventHandler),
        }
    }

    /// Replace the domain event observer
    pub fn with_event_handler(mut self, event_handler: Arc<dyn DomainEventHandler>) -> Self {
        self.event_handler = event_handler;
        self
    }

    /// The instance registry this engine works against
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Look up an instance, creating it if unknown. A freshly created
    /// instance is rehydrated from its snapshot when the gateway has
    /// one, including the chain of active nested instances.
    pub async fn create_or_get(
        &self,
        instance_id: InstanceId,
        graph: Arc<FlowGraph>,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<SharedInstance, EngineError> {
        let (shared, created) =
            self.registry
                .create_or_get(instance_id.clone(), graph, handlers.clone(), None);
        if created {
            // Signals arriving before the load settles must not be
            // evaluated against the still-empty instance
            {
                let mut instance = shared.lock().await;
                instance.begin_deferring();
            }

            let outcome = match self.gateway.load(&instance_id).await {
                Ok(Some(snapshot)) => self
                    .restore_tree(&shared, snapshot.clone())
                    .await
                    .map(|_| Some(snapshot)),
                Ok(None) => Ok(None),
                Err(error) => Err(error),
            };

            let drained = {
                let mut instance = shared.lock().await;
                instance.end_deferring()
            };

            if let Some(done_loading) = handlers.done_loading_handler() {
                done_loading(outcome.clone()).await;
            }
            for signal in drained {
                self.deliver(instance_id.clone(), signal).await?;
            }
            if let Err(error) = outcome {
                return Err(error);
            }
        }
        Ok(shared)
    }

    /// Start an instance at the named start event
    pub async fn send_start_event(
        &self,
        instance_id: &InstanceId,
        event_name: &str,
        data: DataPacket,
    ) -> Result<(), EngineError> {
        self.deliver(
            instance_id.clone(),
            Signal::Start {
                event_name: event_name.to_string(),
                data,
            },
        )
        .await
    }

    /// Signal an externally completed activity finished
    pub async fn task_done(
        &self,
        instance_id: &InstanceId,
        activity: &str,
        data: Option<DataPacket>,
    ) -> Result<(), EngineError> {
        self.deliver(
            instance_id.clone(),
            Signal::ActivityFinished {
                name: activity.to_string(),
                data,
            },
        )
        .await
    }

    /// Read a copy of an instance's token state
    pub async fn state_of(&self, instance_id: &InstanceId) -> Result<ProcessState, EngineError> {
        let shared = self.lookup(instance_id)?;
        let instance = shared.lock().await;
        Ok(instance.state.clone())
    }

    /// Read a copy of an instance's visit log
    pub async fn history_of(&self, instance_id: &InstanceId) -> Result<HistoryLog, EngineError> {
        let shared = self.lookup(instance_id)?;
        let instance = shared.lock().await;
        Ok(instance.history.clone())
    }

    /// Read a copy of an instance's business data
    pub async fn data_of(&self, instance_id: &InstanceId) -> Result<DataPacket, EngineError> {
        let shared = self.lookup(instance_id)?;
        let instance = shared.lock().await;
        Ok(instance.data.clone())
    }

    /// Read one top-level property of an instance's business data
    pub async fn get_property(
        &self,
        instance_id: &InstanceId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, EngineError> {
        let shared = self.lookup(instance_id)?;
        let instance = shared.lock().await;
        Ok(instance.data.get_property(key).cloned())
    }

    /// Write one top-level property of an instance's business data
    pub async fn set_property(
        &self,
        instance_id: &InstanceId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), EngineError> {
        let shared = self.lookup(instance_id)?;
        let mut instance = shared.lock().await;
        instance.data.set_property(key, value);
        Ok(())
    }

    /// Deliver a signal to an instance. Returns a boxed future so signal
    /// processing can recurse through token movement.
    pub fn deliver(
        &self,
        instance_id: InstanceId,
        signal: Signal,
    ) -> BoxFuture<'static, Result<(), EngineError>> {
        let engine = self.clone();
        Box::pin(async move { engine.process_signal(instance_id, signal).await })
    }

    fn lookup(&self, instance_id: &InstanceId) -> Result<SharedInstance, EngineError> {
        self.registry
            .get(instance_id)
            .ok_or_else(|| EngineError::NotFound(format!("process instance '{instance_id}'")))
    }

    async fn process_signal(
        &self,
        instance_id: InstanceId,
        signal: Signal,
    ) -> Result<(), EngineError> {
        let shared = self.lookup(&instance_id)?;

        // While a persist is in flight the instance queues everything
        {
            let mut instance = shared.lock().await;
            if instance.is_deferring() {
                tracing::debug!(instance_id = %instance_id, ?signal, "deferring signal");
                instance.defer(signal);
                return Ok(());
            }
        }

        let result = match signal {
            Signal::Start { event_name, data } => {
                self.on_start(&shared, &instance_id, &event_name, data).await
            }
            Signal::TokenArrived { position } => {
                self.on_token_arrived(&shared, &instance_id, &position).await
            }
            Signal::ActivityFinished { name, data } => {
                self.on_activity_finished(&shared, &instance_id, &name, data)
                    .await
            }
            Signal::TimerFired { boundary, activity } => {
                self.on_timer_fired(&shared, &instance_id, &boundary, &activity)
                    .await
            }
        };

        self.flush_events(&shared).await;
        result
    }

    async fn on_start(
        &self,
        shared: &SharedInstance,
        instance_id: &InstanceId,
        event_name: &str,
        data: DataPacket,
    ) -> Result<(), EngineError> {
        {
            let mut instance = shared.lock().await;
            let graph = instance.graph.clone();
            let start = graph.by_name(event_name)?;
            if !matches!(start.kind, FlowObjectKind::StartEvent) {
                return Err(EngineError::WrongProcessState(format!(
                    "'{event_name}' is not a start event"
                )));
            }
            if instance.state.has_tokens(None) {
                let handlers = instance.handlers.clone();
                drop(instance);
                self.report_fallback(
                    &handlers,
                    FallbackReason::WrongProcessState,
                    event_name,
                    instance_id,
                )
                .await;
                return Ok(());
            }

            instance.data.merge(data);
            let owner = instance_id.as_str().to_string();
            instance.state.create_token_at(event_name, owner);
            instance.history.append(event_name);
            instance.record_event(Box::new(InstanceStarted {
                instance_id: instance_id.clone(),
                definition_id: graph.id().to_string(),
                timestamp: Utc::now(),
            }));
        }

        // The start event is an arrival like any other: its named
        // handler runs before the token moves on
        self.on_token_arrived(shared, instance_id, event_name).await
    }

    async fn on_token_arrived(
        &self,
        shared: &SharedInstance,
        instance_id: &InstanceId,
        position: &str,
    ) -> Result<(), EngineError> {
        let (graph, handlers, data_snapshot) = {
            let mut instance = shared.lock().await;
            instance.record_event(Box::new(TokenEntered {
                instance_id: instance_id.clone(),
                position: position.to_string(),
                timestamp: Utc::now(),
            }));
            (
                instance.graph.clone(),
                instance.handlers.clone(),
                instance.data.clone(),
            )
        };
        let object = graph.by_name(position)?;

        // Every arrival consults the handler named after the position;
        // events and gateways included. The only bypass is a fired
        // boundary timer, which goes straight to token movement.
        match handlers.activity_handler(position) {
            Some(handler) => match handler(data_snapshot).await {
                Ok(Some(update)) => {
                    let mut instance = shared.lock().await;
                    instance.data.merge(update);
                }
                Ok(None) => {}
                Err(error) => self.report_error(&handlers, error).await,
            },
            None => {
                self.report_fallback(
                    &handlers,
                    FallbackReason::NoHandlerFound,
                    position,
                    instance_id,
                )
                .await;
            }
        }

        if let Some(definition) = object.nested_definition().cloned() {
            return self
                .enter_nested(shared, instance_id, position, definition, &handlers)
                .await;
        }

        if object.is_wait_activity() {
            // Park the token until task_done or a boundary timer fires
            self.persist_instance(shared).await?;
            self.arm_timers(shared, instance_id, position).await?;
            return Ok(());
        }

        self.emit_next(shared, instance_id, position).await
    }

    /// Spin up the nested instance a call activity or sub-process
    /// delegates to, then start it with a copy of the parent's data.
    async fn enter_nested(
        &self,
        shared: &SharedInstance,
        instance_id: &InstanceId,
        position: &str,
        definition: Arc<FlowGraph>,
        handlers: &Arc<HandlerRegistry>,
    ) -> Result<(), EngineError> {
        let nested_id = instance_id.nested(position);
        let nested_handlers = handlers
            .scope_for(position)
            .unwrap_or_else(|| Arc::new(HandlerRegistry::new()));

        let parent_data = {
            let mut instance = shared.lock().await;
            if let Some(entry) = instance.history.last_entry_for_mut(position) {
                entry.sub_process_history = Some(HistoryLog::new());
            }
            if let Some(token) = instance.state.token_at_mut(position) {
                token.substate = Some(ProcessState::new());
            }
            instance.data.clone()
        };

        let start_name = definition.sole_start_event()?.name.clone();
        self.registry.create_or_get(
            nested_id.clone(),
            definition,
            nested_handlers,
            Some(ParentLink {
                instance_id: instance_id.clone(),
                token_position: position.to_string(),
            }),
        );

        self.persist_instance(shared).await?;
        self.arm_timers(shared, instance_id, position).await?;

        self.deliver(
            nested_id,
            Signal::Start {
                event_name: start_name,
                data: parent_data,
            },
        )
        .await
    }

    async fn on_activity_finished(
        &self,
        shared: &SharedInstance,
        instance_id: &InstanceId,
        name: &str,
        data: Option<DataPacket>,
    ) -> Result<(), EngineError> {
        let (graph, handlers) = {
            let instance = shared.lock().await;
            (instance.graph.clone(), instance.handlers.clone())
        };

        {
            let instance = shared.lock().await;
            if instance.state.tokens_at(name).is_empty() {
                drop(instance);
                self.report_fallback(
                    &handlers,
                    FallbackReason::WrongProcessState,
                    name,
                    instance_id,
                )
                .await;
                return Ok(());
            }
        }

        let object = graph.by_name(name)?;
        if graph.outgoing_flows(object)?.is_empty() {
            self.report_fallback(&handlers, FallbackReason::NoOutgoingFlow, name, instance_id)
                .await;
            return Ok(());
        }

        {
            let mut instance = shared.lock().await;
            for boundary in instance.cancel_timers_for(name) {
                instance.record_event(Box::new(TimerCancelled {
                    instance_id: instance_id.clone(),
                    boundary,
                    timestamp: Utc::now(),
                }));
            }
            if let Some(update) = data {
                instance.data.merge(update);
            }
            instance.record_event(Box::new(ActivityCompleted {
                instance_id: instance_id.clone(),
                activity: name.to_string(),
                timestamp: Utc::now(),
            }));
        }

        if object.has_done_handler() {
            if let Some(handler) = handlers.done_handler(name) {
                let data_snapshot = {
                    let instance = shared.lock().await;
                    instance.data.clone()
                };
                match handler(data_snapshot).await {
                    Ok(Some(update)) => {
                        let mut instance = shared.lock().await;
                        instance.data.merge(update);
                    }
                    Ok(None) => {}
                    Err(error) => self.report_error(&handlers, error).await,
                }
            }
        }

        self.emit_next(shared, instance_id, name).await
    }

    async fn on_timer_fired(
        &self,
        shared: &SharedInstance,
        instance_id: &InstanceId,
        boundary: &str,
        activity: &str,
    ) -> Result<(), EngineError> {
        {
            let mut instance = shared.lock().await;
            if instance.active_timers.remove(boundary).is_none() {
                // Cancelled after the fire signal was queued
                return Ok(());
            }
            if !instance.state.remove_token_at(activity) {
                return Ok(());
            }
            instance.cancel_timers_for(activity);

            let owner = instance_id.as_str().to_string();
            instance.state.create_token_at(boundary, owner);
            instance.history.append(boundary);
            instance.record_event(Box::new(TimerFired {
                instance_id: instance_id.clone(),
                boundary: boundary.to_string(),
                activity: activity.to_string(),
                timestamp: Utc::now(),
            }));
        }

        // The boundary event itself takes no arrival handler; the token
        // moves straight on through its outgoing flows.
        self.emit_next(shared, instance_id, boundary).await
    }

    /// Move the token(s) sitting at `object_name` along the outgoing
    /// flows, honoring gateway semantics, and deliver arrival signals
    /// for every newly placed token.
    fn emit_next<'a>(
        &'a self,
        shared: &'a SharedInstance,
        instance_id: &'a InstanceId,
        object_name: &'a str,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let mut deliveries: Vec<Signal> = Vec::new();
            let mut completion: Option<(Option<ParentLink>, HistoryLog, ProcessState, DataPacket)> =
                None;

            {
                let mut instance = shared.lock().await;
                let graph = instance.graph.clone();
                let object = graph.by_name(object_name)?;
                let owner = instance_id.as_str().to_string();

                match &object.kind {
                    FlowObjectKind::EndEvent => {
                        instance.state.remove_token_at(object_name);
                        if !instance.state.has_tokens(None) {
                            instance.cancel_all_timers();
                            instance.record_event(Box::new(InstanceCompleted {
                                instance_id: instance_id.clone(),
                                timestamp: Utc::now(),
                            }));
                            completion = Some((
                                instance.parent.clone(),
                                instance.history.clone(),
                                instance.state.clone(),
                                instance.data.clone(),
                            ));
                        }
                    }
                    FlowObjectKind::ExclusiveGateway => {
                        let outgoing = graph.outgoing_flows(object)?;
                        let chosen = if outgoing.len() == 1 {
                            Some(outgoing[0])
                        } else {
                            let mut chosen = None;
                            for flow in &outgoing {
                                let flow_name = flow.name.as_deref().ok_or_else(|| {
                                    EngineError::GatewayResolution(format!(
                                        "Flow '{}' out of gateway '{}' has no name",
                                        flow.id, object.name
                                    ))
                                })?;
                                let predicate = instance
                                    .handlers
                                    .flow_predicate(&object.name, flow_name)
                                    .ok_or_else(|| {
                                        EngineError::GatewayResolution(format!(
                                            "No predicate for flow '{}' of gateway '{}'",
                                            flow_name, object.name
                                        ))
                                    })?;
                                if predicate() {
                                    chosen = Some(*flow);
                                    break;
                                }
                            }
                            chosen
                        };
                        let flow = chosen.ok_or_else(|| {
                            EngineError::GatewayResolution(format!(
                                "No outgoing flow of gateway '{}' matched",
                                object.name
                            ))
                        })?;
                        let target = graph.by_id(&flow.target)?;

                        instance.state.remove_token_at(object_name);
                        instance.state.create_token_at(&target.name, owner);
                        instance.history.append(&target.name);
                        deliveries.push(Signal::TokenArrived {
                            position: target.name.clone(),
                        });
                    }
                    FlowObjectKind::ParallelGateway => {
                        let expected = graph.incoming_flows(object)?.len().max(1);
                        let arrived = instance.state.count_at(object_name, &owner);
                        if arrived < expected {
                            // Join still waiting for sibling branches
                            return Ok(());
                        }
                        instance.state.remove_all_at(object_name, &owner);
                        for target in graph.next_flow_objects(object)? {
                            instance.state.create_token_at(&target.name, owner.clone());
                            instance.history.append(&target.name);
                            deliveries.push(Signal::TokenArrived {
                                position: target.name.clone(),
                            });
                        }
                    }
                    _ => {
                        instance.state.remove_token_at(object_name);
                        for target in graph.next_flow_objects(object)? {
                            instance.state.create_token_at(&target.name, owner.clone());
                            instance.history.append(&target.name);
                            deliveries.push(Signal::TokenArrived {
                                position: target.name.clone(),
                            });
                        }
                    }
                }
            }

            if let Some((parent, history, state, data)) = completion {
                self.flush_events(shared).await;
                match parent {
                    Some(link) => {
                        self.complete_into_parent(instance_id, link, history, state, data)
                            .await?;
                    }
                    None => {
                        self.persist_instance(shared).await?;
                    }
                }
                return Ok(());
            }

            for signal in deliveries {
                self.deliver(instance_id.clone(), signal).await?;
            }
            Ok(())
        })
    }

    /// Graft a completed nested instance's history and final state into
    /// the waiting parent token, then finish the call activity.
    async fn complete_into_parent(
        &self,
        child_id: &InstanceId,
        link: ParentLink,
        child_history: HistoryLog,
        child_state: ProcessState,
        child_data: DataPacket,
    ) -> Result<(), EngineError> {
        let parent_shared = self.lookup(&link.instance_id)?;
        {
            let mut parent = parent_shared.lock().await;
            if let Some(entry) = parent.history.last_entry_for_mut(&link.token_position) {
                entry.sub_process_history = Some(child_history);
            }
            if let Some(token) = parent.state.token_at_mut(&link.token_position) {
                token.substate = Some(child_state);
            }
        }
        self.registry.remove(child_id);

        self.deliver(
            link.instance_id,
            Signal::ActivityFinished {
                name: link.token_position,
                data: Some(child_data),
            },
        )
        .await
    }

    /// Arm one timer per timer boundary event attached to `activity`.
    /// A missing or non-numeric timeout skips that boundary without
    /// failing the signal.
    async fn arm_timers(
        &self,
        shared: &SharedInstance,
        instance_id: &InstanceId,
        activity: &str,
    ) -> Result<(), EngineError> {
        let (graph, handlers) = {
            let instance = shared.lock().await;
            (instance.graph.clone(), instance.handlers.clone())
        };
        let object = graph.by_name(activity)?;

        for boundary in graph.boundary_events_attached_to(object)? {
            let FlowObjectKind::BoundaryEvent { timer, .. } = &boundary.kind else {
                continue;
            };
            if !*timer {
                continue;
            }

            let Some(provider) = handlers.timeout_handler(&boundary.name) else {
                self.report_fallback(
                    &handlers,
                    FallbackReason::NoHandlerFound,
                    &boundary.name,
                    instance_id,
                )
                .await;
                continue;
            };
            let value = provider();
            let Some(timeout) = value.as_f64().filter(|t| t.is_finite()) else {
                self.report_error(&handlers, EngineError::InvalidTimeout(value.to_string()))
                    .await;
                continue;
            };
            let timeout = timeout.max(0.0);
            let sleep_for = Duration::from_secs_f64(timeout / 1000.0);

            let registration_id = Uuid::new_v4().to_string();
            let engine = self.clone();
            let timer_instance = instance_id.clone();
            let boundary_name = boundary.name.clone();
            let activity_name = activity.to_string();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(sleep_for).await;
                if let Err(error) = engine
                    .deliver(
                        timer_instance,
                        Signal::TimerFired {
                            boundary: boundary_name,
                            activity: activity_name,
                        },
                    )
                    .await
                {
                    tracing::warn!(%error, "boundary timer delivery failed");
                }
            });

            let mut instance = shared.lock().await;
            instance.active_timers.insert(
                boundary.name.clone(),
                BoundaryTimer::new(registration_id, activity, handle),
            );
            instance.record_event(Box::new(TimerArmed {
                instance_id: instance_id.clone(),
                boundary: boundary.name.clone(),
                timeout_ms: timeout as u64,
                timestamp: Utc::now(),
            }));
        }
        Ok(())
    }

    /// Write the instance tree to the gateway. Signals arriving while
    /// the write is in flight are queued on the root instance and
    /// replayed in arrival order afterwards.
    async fn persist_instance(&self, shared: &SharedInstance) -> Result<(), EngineError> {
        // Snapshots are stored per root instance with the nested chain
        // embedded, so walk up before persisting.
        let mut root = shared.clone();
        loop {
            let parent = {
                let instance = root.lock().await;
                instance.parent.clone()
            };
            match parent {
                Some(link) => root = self.lookup(&link.instance_id)?,
                None => break,
            }
        }

        let (root_id, handlers) = {
            let mut instance = root.lock().await;
            instance.begin_deferring();
            (instance.id.clone(), instance.handlers.clone())
        };

        let outcome = match self.build_snapshot(root.clone()).await {
            Ok(snapshot) => self.gateway.persist(snapshot).await,
            Err(error) => Err(error),
        };

        let drained = {
            let mut instance = root.lock().await;
            instance.end_deferring()
        };

        if let Some(done_saving) = handlers.done_saving_handler() {
            done_saving(outcome.clone()).await;
        }

        // Queued signals are replayed even when the write failed;
        // dropping them would deliver them zero times instead of once.
        for signal in drained {
            self.deliver(root_id.clone(), signal).await?;
        }

        outcome.map(|_| ())
    }

    /// Build the wire snapshot of an instance, embedding the snapshot
    /// of its active nested instance recursively. Locks one instance at
    /// a time.
    fn build_snapshot(
        &self,
        shared: SharedInstance,
    ) -> BoxFuture<'static, Result<Snapshot, EngineError>> {
        let engine = self.clone();
        Box::pin(async move {
            let (mut snapshot, nested_ref) = {
                let instance = shared.lock().await;
                let graph = instance.graph.clone();
                let mut nested_ref = None;
                for token in &instance.state.tokens {
                    if let Ok(object) = graph.by_name(&token.position) {
                        if object.nested_definition().is_some() {
                            nested_ref = Some((instance.id.nested(&token.position), token.clone()));
                            break;
                        }
                    }
                }
                (
                    Snapshot::new(
                        instance.id.as_str(),
                        instance.data.clone(),
                        instance.state.clone(),
                        instance.history.clone(),
                    ),
                    nested_ref,
                )
            };

            if let Some((nested_id, parent_token)) = nested_ref {
                if let Some(nested_shared) = engine.registry.get(&nested_id) {
                    let nested_snapshot = engine.build_snapshot(nested_shared).await?;
                    snapshot.active_subprocess = Some(Box::new(nested_snapshot));
                    snapshot.active_subprocess_parent_token = Some(parent_token);
                }
            }
            Ok(snapshot)
        })
    }

    /// Rebuild an instance tree from a loaded snapshot, re-registering
    /// the chain of active nested instances and re-arming boundary
    /// timers on parked wait activities.
    async fn restore_tree(
        &self,
        root: &SharedInstance,
        snapshot: Snapshot,
    ) -> Result<(), EngineError> {
        let mut current = root.clone();
        let mut pending = Some(snapshot);

        while let Some(snap) = pending.take() {
            let (graph, handlers, current_id) = {
                let mut instance = current.lock().await;
                instance.data = snap.data;
                instance.state = snap.state;
                instance.history = snap.history;
                (
                    instance.graph.clone(),
                    instance.handlers.clone(),
                    instance.id.clone(),
                )
            };

            // Re-arm timers for tokens parked on wait activities; the
            // nested chain keeps executing through its own instance.
            let parked: Vec<String> = {
                let instance = current.lock().await;
                instance
                    .state
                    .tokens
                    .iter()
                    .filter_map(|token| {
                        let object = graph.by_name(&token.position).ok()?;
                        (object.is_wait_activity() && object.nested_definition().is_none())
                            .then(|| token.position.clone())
                    })
                    .collect()
            };
            for position in parked {
                self.arm_timers(&current, &current_id, &position).await?;
            }

            if let (Some(nested_snap), Some(parent_token)) =
                (snap.active_subprocess, snap.active_subprocess_parent_token)
            {
                let position = parent_token.position;
                let object = graph.by_name(&position)?;
                let definition = object.nested_definition().cloned().ok_or_else(|| {
                    EngineError::InvalidDefinition(format!(
                        "Snapshot nests under '{position}', which delegates to no definition"
                    ))
                })?;
                let nested_handlers = handlers
                    .scope_for(&position)
                    .unwrap_or_else(|| Arc::new(HandlerRegistry::new()));
                let nested_id = current_id.nested(&position);
                let (nested_shared, _) = self.registry.create_or_get(
                    nested_id,
                    definition,
                    nested_handlers,
                    Some(ParentLink {
                        instance_id: current_id,
                        token_position: position,
                    }),
                );
                current = nested_shared;
                pending = Some(*nested_snap);
            }
        }
        Ok(())
    }

    async fn flush_events(&self, shared: &SharedInstance) {
        let events = {
            let mut instance = shared.lock().await;
            instance.take_events()
        };
        for event in events {
            self.event_handler.handle_event(event).await;
        }
    }

    async fn report_fallback(
        &self,
        handlers: &Arc<HandlerRegistry>,
        reason: FallbackReason,
        position: &str,
        instance_id: &InstanceId,
    ) {
        match handlers.default_event_handler() {
            Some(handler) => {
                handler(FallbackNotice {
                    reason,
                    position: position.to_string(),
                    instance_id: instance_id.as_str().to_string(),
                })
                .await;
            }
            None => {
                tracing::debug!(instance_id = %instance_id, position, ?reason, "unhandled signal");
            }
        }
    }

    async fn report_error(&self, handlers: &Arc<HandlerRegistry>, error: EngineError) {
        match handlers.default_error_handler() {
            Some(handler) => handler(error).await,
            None => tracing::error!(%error, "handler failed"),
        }
    }
}
