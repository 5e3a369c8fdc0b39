//! Callback registration for process definitions.
//!
//! Handlers are addressed by flow object name, with composite keys for
//! the special cases: `<name>Done` for completion callbacks,
//! `<gateway>:<flow>` for exclusive gateway predicates, and
//! `<boundary>$getTimeout` for boundary timer durations. Nested
//! definitions get their own registry through [`HandlerRegistry::scope`].

use crate::domain::persistence::Snapshot;
use crate::error::EngineError;
use crate::types::DataPacket;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Callback invoked when a token enters an activity, or when an
/// externally completed activity finishes. Returning `Some` merges the
/// packet into the instance data.
pub type ActivityHandler =
    Arc<dyn Fn(DataPacket) -> BoxFuture<'static, Result<Option<DataPacket>, EngineError>> + Send + Sync>;

/// Predicate deciding whether an exclusive gateway takes a given flow
pub type GatewayPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Callback producing the timeout for a boundary timer event. Must
/// return a JSON number of milliseconds.
pub type TimeoutHandler = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

/// Callback for signals no specific handler was registered for
pub type DefaultEventHandler = Arc<dyn Fn(FallbackNotice) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback for handler failures the engine absorbs
pub type DefaultErrorHandler = Arc<dyn Fn(EngineError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback observing the outcome of a snapshot load
pub type DoneLoadingHandler =
    Arc<dyn Fn(Result<Option<Snapshot>, EngineError>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback observing the outcome of a snapshot write
pub type DoneSavingHandler =
    Arc<dyn Fn(Result<Snapshot, EngineError>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Why the engine fell back to the default event handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// No handler was registered for the flow object
    NoHandlerFound,
    /// The signal does not match the instance's token state
    WrongProcessState,
    /// The finished activity has no outgoing sequence flow
    NoOutgoingFlow,
}

/// Payload handed to the default event handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackNotice {
    /// Why the fallback was taken
    pub reason: FallbackReason,
    /// Name of the flow object involved
    pub position: String,
    /// Instance the signal was delivered to
    pub instance_id: String,
}

/// Handler registry for one process definition.
///
/// Built once with the consuming builder methods, then shared behind an
/// `Arc`. Registration order of gateway predicates does not matter; the
/// engine evaluates them in the order the flows are declared in the
/// definition.
#[derive(Default)]
pub struct HandlerRegistry {
    activities: HashMap<String, ActivityHandler>,
    predicates: HashMap<String, GatewayPredicate>,
    timeouts: HashMap<String, TimeoutHandler>,
    scopes: HashMap<String, Arc<HandlerRegistry>>,
    default_event_handler: Option<DefaultEventHandler>,
    default_error_handler: Option<DefaultErrorHandler>,
    done_loading: Option<DoneLoadingHandler>,
    done_saving: Option<DoneSavingHandler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("activities", &self.activities.keys().collect::<Vec<_>>())
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .field("timeouts", &self.timeouts.keys().collect::<Vec<_>>())
            .field("scopes", &self.scopes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity handler, keyed by flow object name
    pub fn on<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(DataPacket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<DataPacket>, EngineError>> + Send + 'static,
    {
        self.activities
            .insert(name.into(), Arc::new(move |data| Box::pin(handler(data))));
        self
    }

    /// Register a completion handler for an externally completed
    /// activity, stored under `<name>Done`
    pub fn on_done<F, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(DataPacket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<DataPacket>, EngineError>> + Send + 'static,
    {
        self.on(format!("{name}Done"), handler)
    }

    /// Register a predicate for one outgoing flow of an exclusive
    /// gateway, stored under `<gateway>:<flow>`
    pub fn predicate<F>(mut self, gateway: &str, flow: &str, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.predicates
            .insert(format!("{gateway}:{flow}"), Arc::new(predicate));
        self
    }

    /// Register a timeout provider for a boundary timer event, stored
    /// under `<boundary>$getTimeout`
    pub fn timeout<F>(mut self, boundary: &str, provider: F) -> Self
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        self.timeouts
            .insert(format!("{boundary}$getTimeout"), Arc::new(provider));
        self
    }

    /// Attach a handler scope for the named call activity or
    /// sub-process
    pub fn scope(mut self, call_activity: impl Into<String>, registry: HandlerRegistry) -> Self {
        self.scopes
            .insert(call_activity.into(), Arc::new(registry));
        self
    }

    /// Register the default event handler
    pub fn on_default_event<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(FallbackNotice) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.default_event_handler = Some(Arc::new(move |notice| Box::pin(handler(notice))));
        self
    }

    /// Register the default error handler
    pub fn on_default_error<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(EngineError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.default_error_handler = Some(Arc::new(move |error| Box::pin(handler(error))));
        self
    }

    /// Register a callback fired once a snapshot load settles, with
    /// the loaded snapshot (or `None` for a fresh instance) or the
    /// load error
    pub fn on_done_loading<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Result<Option<Snapshot>, EngineError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.done_loading = Some(Arc::new(move |outcome| Box::pin(handler(outcome))));
        self
    }

    /// Register a callback fired once a snapshot write settles, with
    /// the stored snapshot or the write error
    pub fn on_done_saving<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Result<Snapshot, EngineError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.done_saving = Some(Arc::new(move |outcome| Box::pin(handler(outcome))));
        self
    }

    /// Look up the activity handler for a flow object name
    pub fn activity_handler(&self, name: &str) -> Option<ActivityHandler> {
        self.activities.get(name).cloned()
    }

    /// Look up the completion handler for an activity
    pub fn done_handler(&self, name: &str) -> Option<ActivityHandler> {
        self.activities.get(&format!("{name}Done")).cloned()
    }

    /// Look up the predicate guarding one outgoing flow of a gateway
    pub fn flow_predicate(&self, gateway: &str, flow: &str) -> Option<GatewayPredicate> {
        self.predicates.get(&format!("{gateway}:{flow}")).cloned()
    }

    /// Look up the timeout provider of a boundary timer event
    pub fn timeout_handler(&self, boundary: &str) -> Option<TimeoutHandler> {
        self.timeouts.get(&format!("{boundary}$getTimeout")).cloned()
    }

    /// Look up the handler scope of a call activity or sub-process
    pub fn scope_for(&self, call_activity: &str) -> Option<Arc<HandlerRegistry>> {
        self.scopes.get(call_activity).cloned()
    }

    /// The default event handler, if registered
    pub fn default_event_handler(&self) -> Option<DefaultEventHandler> {
        self.default_event_handler.clone()
    }

    /// The default error handler, if registered
    pub fn default_error_handler(&self) -> Option<DefaultErrorHandler> {
        self.default_error_handler.clone()
    }

    /// The done-loading callback, if registered
    pub fn done_loading_handler(&self) -> Option<DoneLoadingHandler> {
        self.done_loading.clone()
    }

    /// The done-saving callback, if registered
    pub fn done_saving_handler(&self) -> Option<DoneSavingHandler> {
        self.done_saving.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_activity_handler_lookup_and_invoke() {
        let registry = HandlerRegistry::new().on("Reserve Stock", |data: DataPacket| async move {
            let mut update = DataPacket::object();
            update.set_property("reserved", json!(data.get_property("sku").is_some()));
            Ok(Some(update))
        });

        let handler = registry.activity_handler("Reserve Stock").unwrap();
        let mut input = DataPacket::object();
        input.set_property("sku", json!("A-1"));

        let result = handler(input).await.unwrap().unwrap();
        assert_eq!(result.get_property("reserved"), Some(&json!(true)));

        assert!(registry.activity_handler("Missing").is_none());
    }

    #[tokio::test]
    async fn test_done_handler_uses_composite_key() {
        let registry = HandlerRegistry::new()
            .on_done("Review Order", |_| async { Ok(None) });

        assert!(registry.done_handler("Review Order").is_some());
        assert!(registry.activity_handler("Review OrderDone").is_some());
        assert!(registry.activity_handler("Review Order").is_none());
    }

    #[test]
    fn test_predicate_and_timeout_keys() {
        let registry = HandlerRegistry::new()
            .predicate("Decision", "approved", || true)
            .timeout("Review Timeout", || json!(250));

        let predicate = registry.flow_predicate("Decision", "approved").unwrap();
        assert!(predicate());
        assert!(registry.flow_predicate("Decision", "rejected").is_none());

        let timeout = registry.timeout_handler("Review Timeout").unwrap();
        assert_eq!(timeout(), json!(250));
        assert!(registry.timeout_handler("Other").is_none());
    }

    #[test]
    fn test_scopes_are_isolated() {
        let nested = HandlerRegistry::new().on("Inner Task", |_| async { Ok(None) });
        let registry = HandlerRegistry::new().scope("Call Shipping", nested);

        let scope = registry.scope_for("Call Shipping").unwrap();
        assert!(scope.activity_handler("Inner Task").is_some());
        assert!(registry.activity_handler("Inner Task").is_none());
        assert!(registry.scope_for("Other").is_none());
    }

    #[tokio::test]
    async fn test_default_handlers() {
        use crate::domain::history::HistoryLog;
        use crate::domain::process_state::ProcessState;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let outcomes = Arc::new(AtomicUsize::new(0));
        let loads = outcomes.clone();
        let saves = outcomes.clone();
        let registry = HandlerRegistry::new()
            .on_default_event(|_notice| async {})
            .on_default_error(|_error| async {})
            .on_done_loading(move |outcome| {
                let loads = loads.clone();
                async move {
                    if matches!(outcome, Ok(None)) {
                        loads.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .on_done_saving(move |outcome| {
                let saves = saves.clone();
                async move {
                    if outcome.is_ok() {
                        saves.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });

        assert!(registry.default_event_handler().is_some());
        assert!(registry.default_error_handler().is_some());

        registry.done_loading_handler().unwrap()(Ok(None)).await;
        let stored = Snapshot::new(
            "order-1",
            DataPacket::object(),
            ProcessState::new(),
            HistoryLog::new(),
        );
        registry.done_saving_handler().unwrap()(Ok(stored)).await;
        assert_eq!(outcomes.load(Ordering::SeqCst), 2);
    }
}
