use crate::domain::flow_graph::FlowGraph;
use crate::domain::instance::{InstanceId, ParentLink, ProcessInstance, SharedInstance};
use crate::handlers::HandlerRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Explicit, constructible registry of live process instances.
///
/// There is no global table; every engine owns its registry, so tests
/// and embedders can run several isolated engines side by side.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: DashMap<String, SharedInstance>,
}

impl InstanceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live instance
    pub fn get(&self, instance_id: &InstanceId) -> Option<SharedInstance> {
        self.instances.get(instance_id.as_str()).map(|i| i.clone())
    }

    /// Look up an instance or create it. Returns the shared handle and
    /// whether it was created by this call.
    pub fn create_or_get(
        &self,
        instance_id: InstanceId,
        graph: Arc<FlowGraph>,
        handlers: Arc<HandlerRegistry>,
        parent: Option<ParentLink>,
    ) -> (SharedInstance, bool) {
        let mut created = false;
        let shared = self
            .instances
            .entry(instance_id.as_str().to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(ProcessInstance::new(
                    instance_id, graph, handlers, parent,
                )))
            })
            .clone();
        (shared, created)
    }

    /// Insert a fully built instance, replacing any previous one
    pub fn put(&self, instance: ProcessInstance) -> SharedInstance {
        let id = instance.id.as_str().to_string();
        let shared = Arc::new(Mutex::new(instance));
        self.instances.insert(id, shared.clone());
        shared
    }

    /// Remove an instance, returning its handle if it was present
    pub fn remove(&self, instance_id: &InstanceId) -> Option<SharedInstance> {
        self.instances
            .remove(instance_id.as_str())
            .map(|(_, instance)| instance)
    }

    /// Remove every instance
    pub fn clear(&self) {
        self.instances.clear();
    }

    /// Number of live instances
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no instance is live
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
