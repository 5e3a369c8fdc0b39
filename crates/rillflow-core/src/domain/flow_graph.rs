use crate::EngineError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Value object: flow object ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowObjectId(pub String);

impl FlowObjectId {
    /// Create a flow object ID from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Concrete task flavors. Which flavor a task carries decides whether it
/// completes automatically after its handler returns or waits for an
/// external `task_done` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Automatic service task
    Service,
    /// Automatic script task
    Script,
    /// Automatic send task
    Send,
    /// User task, completed externally
    User,
    /// Manual task, completed externally
    Manual,
    /// Receive task, completed externally
    Receive,
    /// Plain task with no marker, completed externally
    Unspecified,
}

impl TaskKind {
    /// Whether this task flavor waits for an external completion signal
    pub fn is_wait(self) -> bool {
        matches!(
            self,
            TaskKind::User | TaskKind::Manual | TaskKind::Receive | TaskKind::Unspecified
        )
    }

    /// Whether a `<name>Done` handler applies to this task flavor
    pub fn has_done_handler(self) -> bool {
        matches!(self, TaskKind::User | TaskKind::Manual | TaskKind::Unspecified)
    }
}

/// The kind of a flow object together with its kind-specific payload.
///
/// Engine dispatch switches on this discriminator; there is no runtime
/// type inspection anywhere.
#[derive(Debug, Clone)]
pub enum FlowObjectKind {
    /// Process entry point
    StartEvent,
    /// Process (or branch) exit point
    EndEvent,
    /// An activity of the given flavor
    Task(TaskKind),
    /// Diverging/converging exclusive gateway
    ExclusiveGateway,
    /// Fork/join parallel gateway (counting join)
    ParallelGateway,
    /// Event attached to the border of a wait activity
    BoundaryEvent {
        /// The activity this event is attached to
        attached_to: FlowObjectId,
        /// Whether the event is timer-driven
        timer: bool,
    },
    /// Activity that delegates to a separately defined process
    CallActivity {
        /// The definition the nested instance runs
        definition: Arc<FlowGraph>,
    },
    /// Inline sub-process, executed like a call activity
    SubProcess {
        /// The definition the nested instance runs
        definition: Arc<FlowGraph>,
    },
    /// Catching intermediate event
    IntermediateCatchEvent,
    /// Throwing intermediate event
    IntermediateThrowEvent,
}

impl FlowObjectKind {
    /// Short tag for logs and error messages
    pub fn tag(&self) -> &'static str {
        match self {
            FlowObjectKind::StartEvent => "startEvent",
            FlowObjectKind::EndEvent => "endEvent",
            FlowObjectKind::Task(_) => "task",
            FlowObjectKind::ExclusiveGateway => "exclusiveGateway",
            FlowObjectKind::ParallelGateway => "parallelGateway",
            FlowObjectKind::BoundaryEvent { .. } => "boundaryEvent",
            FlowObjectKind::CallActivity { .. } => "callActivity",
            FlowObjectKind::SubProcess { .. } => "subProcess",
            FlowObjectKind::IntermediateCatchEvent => "intermediateCatchEvent",
            FlowObjectKind::IntermediateThrowEvent => "intermediateThrowEvent",
        }
    }
}

/// A node in the process graph. Immutable once added to a graph.
#[derive(Debug, Clone)]
pub struct FlowObject {
    /// ID, unique within the definition
    pub id: FlowObjectId,
    /// Name, unique within the definition; tokens and handlers are
    /// addressed by name
    pub name: String,
    /// Kind plus kind-specific payload
    pub kind: FlowObjectKind,
}

impl FlowObject {
    /// Create a new flow object
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: FlowObjectKind) -> Self {
        Self {
            id: FlowObjectId::new(id),
            name: name.into(),
            kind,
        }
    }

    /// Whether this object waits for an external completion signal
    /// before the engine moves past it
    pub fn is_wait_activity(&self) -> bool {
        match &self.kind {
            FlowObjectKind::Task(task) => task.is_wait(),
            FlowObjectKind::CallActivity { .. } | FlowObjectKind::SubProcess { .. } => true,
            _ => false,
        }
    }

    /// Whether a `<name>Done` handler is consulted when this object is
    /// signaled finished
    pub fn has_done_handler(&self) -> bool {
        matches!(&self.kind, FlowObjectKind::Task(task) if task.has_done_handler())
    }

    /// The nested definition, when this object delegates to one
    pub fn nested_definition(&self) -> Option<&Arc<FlowGraph>> {
        match &self.kind {
            FlowObjectKind::CallActivity { definition } => Some(definition),
            FlowObjectKind::SubProcess { definition } => Some(definition),
            _ => None,
        }
    }
}

/// A directed edge between two flow objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFlow {
    /// Edge ID
    pub id: String,
    /// Edge name; mandatory only on flows diverging from an exclusive
    /// gateway with more than one outgoing flow
    pub name: Option<String>,
    /// Source flow object ID
    pub source: FlowObjectId,
    /// Target flow object ID
    pub target: FlowObjectId,
}

impl SequenceFlow {
    /// Create a sequence flow
    pub fn new(
        id: impl Into<String>,
        name: Option<&str>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            source: FlowObjectId::new(source),
            target: FlowObjectId::new(target),
        }
    }
}

/// A parsed process definition: flow objects, sequence flows, and lazily
/// built lookup indices.
///
/// The indices are computed on first use and invalidated whenever an
/// object or flow is added. Structural errors (duplicate names, boundary
/// events attached to non-wait activities) surface when the relevant
/// index is built.
#[derive(Debug, Default)]
pub struct FlowGraph {
    id: String,
    objects: Vec<FlowObject>,
    flows: Vec<SequenceFlow>,

    by_id: OnceCell<HashMap<FlowObjectId, usize>>,
    by_name: OnceCell<HashMap<String, usize>>,
    outgoing: OnceCell<HashMap<FlowObjectId, Vec<usize>>>,
    incoming: OnceCell<HashMap<FlowObjectId, Vec<usize>>>,
    boundary: OnceCell<HashMap<FlowObjectId, Vec<usize>>>,
}

impl FlowGraph {
    /// Create an empty graph with the given definition id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// The definition id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All flow objects, in insertion order
    pub fn flow_objects(&self) -> &[FlowObject] {
        &self.objects
    }

    /// All sequence flows, in insertion order
    pub fn sequence_flows(&self) -> &[SequenceFlow] {
        &self.flows
    }

    /// Add a flow object. Invalidates all lazy indices.
    pub fn add_flow_object(&mut self, object: FlowObject) {
        self.objects.push(object);
        self.invalidate();
    }

    /// Add a sequence flow. Both endpoints must already be present.
    /// Invalidates all lazy indices.
    pub fn add_sequence_flow(&mut self, flow: SequenceFlow) -> Result<(), EngineError> {
        for endpoint in [&flow.source, &flow.target] {
            if !self.objects.iter().any(|o| &o.id == endpoint) {
                return Err(EngineError::InvalidDefinition(format!(
                    "Sequence flow '{}' references unknown flow object id '{}'",
                    flow.id, endpoint.0
                )));
            }
        }
        self.flows.push(flow);
        self.invalidate();
        Ok(())
    }

    fn invalidate(&mut self) {
        self.by_id = OnceCell::new();
        self.by_name = OnceCell::new();
        self.outgoing = OnceCell::new();
        self.incoming = OnceCell::new();
        self.boundary = OnceCell::new();
    }

    fn id_index(&self) -> Result<&HashMap<FlowObjectId, usize>, EngineError> {
        self.by_id.get_or_try_init(|| {
            let mut index = HashMap::with_capacity(self.objects.len());
            for (position, object) in self.objects.iter().enumerate() {
                if index.insert(object.id.clone(), position).is_some() {
                    return Err(EngineError::InvalidDefinition(format!(
                        "Duplicate flow object id: {}",
                        object.id.0
                    )));
                }
            }
            Ok(index)
        })
    }

    fn name_index(&self) -> Result<&HashMap<String, usize>, EngineError> {
        self.by_name.get_or_try_init(|| {
            let mut index = HashMap::with_capacity(self.objects.len());
            for (position, object) in self.objects.iter().enumerate() {
                if index.insert(object.name.clone(), position).is_some() {
                    return Err(EngineError::DuplicateName(object.name.clone()));
                }
            }
            Ok(index)
        })
    }

    fn outgoing_index(&self) -> &HashMap<FlowObjectId, Vec<usize>> {
        self.outgoing.get_or_init(|| {
            let mut index: HashMap<FlowObjectId, Vec<usize>> = HashMap::new();
            for (position, flow) in self.flows.iter().enumerate() {
                index.entry(flow.source.clone()).or_default().push(position);
            }
            index
        })
    }

    fn incoming_index(&self) -> &HashMap<FlowObjectId, Vec<usize>> {
        self.incoming.get_or_init(|| {
            let mut index: HashMap<FlowObjectId, Vec<usize>> = HashMap::new();
            for (position, flow) in self.flows.iter().enumerate() {
                index.entry(flow.target.clone()).or_default().push(position);
            }
            index
        })
    }

    fn boundary_index(&self) -> Result<&HashMap<FlowObjectId, Vec<usize>>, EngineError> {
        self.boundary.get_or_try_init(|| {
            let mut index: HashMap<FlowObjectId, Vec<usize>> = HashMap::new();
            for (position, object) in self.objects.iter().enumerate() {
                if let FlowObjectKind::BoundaryEvent { attached_to, .. } = &object.kind {
                    let attached = self.by_id_inner(attached_to)?;
                    if !attached.is_wait_activity() {
                        return Err(EngineError::InvalidDefinition(format!(
                            "Boundary event '{}' is attached to '{}', which is not a wait activity",
                            object.name, attached.name
                        )));
                    }
                    index.entry(attached_to.clone()).or_default().push(position);
                }
            }
            Ok(index)
        })
    }

    fn by_id_inner(&self, id: &FlowObjectId) -> Result<&FlowObject, EngineError> {
        let position = self
            .id_index()?
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("flow object id '{}'", id.0)))?;
        Ok(&self.objects[*position])
    }

    /// Look up a flow object by id
    pub fn by_id(&self, id: &FlowObjectId) -> Result<&FlowObject, EngineError> {
        self.by_id_inner(id)
    }

    /// Look up a flow object by name
    pub fn by_name(&self, name: &str) -> Result<&FlowObject, EngineError> {
        let position = self
            .name_index()?
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("flow object '{}'", name)))?;
        Ok(&self.objects[*position])
    }

    /// Sequence flows leaving the given object, in declared order
    pub fn outgoing_flows(&self, object: &FlowObject) -> Result<Vec<&SequenceFlow>, EngineError> {
        // Force the id index so dangling ids fail here, not downstream
        self.id_index()?;
        Ok(self
            .outgoing_index()
            .get(&object.id)
            .map(|positions| positions.iter().map(|p| &self.flows[*p]).collect())
            .unwrap_or_default())
    }

    /// Sequence flows entering the given object, in declared order
    pub fn incoming_flows(&self, object: &FlowObject) -> Result<Vec<&SequenceFlow>, EngineError> {
        self.id_index()?;
        Ok(self
            .incoming_index()
            .get(&object.id)
            .map(|positions| positions.iter().map(|p| &self.flows[*p]).collect())
            .unwrap_or_default())
    }

    /// Boundary events attached to the given activity
    pub fn boundary_events_attached_to(
        &self,
        activity: &FlowObject,
    ) -> Result<Vec<&FlowObject>, EngineError> {
        Ok(self
            .boundary_index()?
            .get(&activity.id)
            .map(|positions| positions.iter().map(|p| &self.objects[*p]).collect())
            .unwrap_or_default())
    }

    /// Targets of the given object's outgoing flows, in declared order
    pub fn next_flow_objects(&self, object: &FlowObject) -> Result<Vec<&FlowObject>, EngineError> {
        self.outgoing_flows(object)?
            .into_iter()
            .map(|flow| self.by_id(&flow.target))
            .collect()
    }

    /// The unique start event of this definition. Nested instances are
    /// started here; zero or several start events is a definition error.
    pub fn sole_start_event(&self) -> Result<&FlowObject, EngineError> {
        let mut starts = self
            .objects
            .iter()
            .filter(|o| matches!(o.kind, FlowObjectKind::StartEvent));

        match (starts.next(), starts.next()) {
            (Some(start), None) => Ok(start),
            (None, _) => Err(EngineError::InvalidDefinition(format!(
                "Definition '{}' has no start event",
                self.id
            ))),
            (Some(_), Some(_)) => Err(EngineError::InvalidDefinition(format!(
                "Definition '{}' has more than one start event",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_graph() -> FlowGraph {
        let mut graph = FlowGraph::new("linear");
        graph.add_flow_object(FlowObject::new("s1", "Start", FlowObjectKind::StartEvent));
        graph.add_flow_object(FlowObject::new(
            "t1",
            "Task",
            FlowObjectKind::Task(TaskKind::Unspecified),
        ));
        graph.add_flow_object(FlowObject::new("e1", "End", FlowObjectKind::EndEvent));
        graph
            .add_sequence_flow(SequenceFlow::new("f1", None, "s1", "t1"))
            .unwrap();
        graph
            .add_sequence_flow(SequenceFlow::new("f2", None, "t1", "e1"))
            .unwrap();
        graph
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let graph = linear_graph();

        let task = graph.by_name("Task").unwrap();
        assert_eq!(task.id, FlowObjectId::new("t1"));
        assert!(task.is_wait_activity());

        let start = graph.by_id(&FlowObjectId::new("s1")).unwrap();
        assert_eq!(start.name, "Start");
        assert!(!start.is_wait_activity());
    }

    #[test]
    fn test_lookup_missing_is_not_found() {
        let graph = linear_graph();

        assert!(matches!(
            graph.by_name("Nope"),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            graph.by_id(&FlowObjectId::new("zz")),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_name_fails_at_index_build() {
        let mut graph = FlowGraph::new("dups");
        graph.add_flow_object(FlowObject::new("a", "Same", FlowObjectKind::StartEvent));
        graph.add_flow_object(FlowObject::new("b", "Same", FlowObjectKind::EndEvent));

        assert!(matches!(
            graph.by_name("Same"),
            Err(EngineError::DuplicateName(name)) if name == "Same"
        ));
    }

    #[test]
    fn test_dangling_sequence_flow_rejected() {
        let mut graph = FlowGraph::new("dangling");
        graph.add_flow_object(FlowObject::new("s1", "Start", FlowObjectKind::StartEvent));

        let result = graph.add_sequence_flow(SequenceFlow::new("f1", None, "s1", "missing"));
        assert!(matches!(result, Err(EngineError::InvalidDefinition(_))));
    }

    #[test]
    fn test_outgoing_and_next_in_declared_order() {
        let mut graph = FlowGraph::new("fanout");
        graph.add_flow_object(FlowObject::new("g", "Gate", FlowObjectKind::ExclusiveGateway));
        graph.add_flow_object(FlowObject::new("a", "A", FlowObjectKind::EndEvent));
        graph.add_flow_object(FlowObject::new("b", "B", FlowObjectKind::EndEvent));
        graph
            .add_sequence_flow(SequenceFlow::new("f1", Some("toA"), "g", "a"))
            .unwrap();
        graph
            .add_sequence_flow(SequenceFlow::new("f2", Some("toB"), "g", "b"))
            .unwrap();

        let gate = graph.by_name("Gate").unwrap();
        let outgoing = graph.outgoing_flows(gate).unwrap();
        assert_eq!(outgoing.len(), 2);
        assert_eq!(outgoing[0].name.as_deref(), Some("toA"));
        assert_eq!(outgoing[1].name.as_deref(), Some("toB"));

        let targets = graph.next_flow_objects(gate).unwrap();
        assert_eq!(targets[0].name, "A");
        assert_eq!(targets[1].name, "B");
    }

    #[test]
    fn test_index_invalidation_on_add() {
        let mut graph = linear_graph();
        // Build the name index, then mutate
        assert!(graph.by_name("Task").is_ok());

        graph.add_flow_object(FlowObject::new(
            "t2",
            "Later",
            FlowObjectKind::Task(TaskKind::Service),
        ));
        assert!(graph.by_name("Later").is_ok());
    }

    #[test]
    fn test_boundary_event_indexing() {
        let mut graph = linear_graph();
        graph.add_flow_object(FlowObject::new(
            "b1",
            "Timeout",
            FlowObjectKind::BoundaryEvent {
                attached_to: FlowObjectId::new("t1"),
                timer: true,
            },
        ));
        graph.add_flow_object(FlowObject::new("e2", "TimedOut", FlowObjectKind::EndEvent));
        graph
            .add_sequence_flow(SequenceFlow::new("f3", None, "b1", "e2"))
            .unwrap();

        let task = graph.by_name("Task").unwrap();
        let attached = graph.boundary_events_attached_to(task).unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].name, "Timeout");

        let start = graph.by_name("Start").unwrap();
        assert!(graph.boundary_events_attached_to(start).unwrap().is_empty());
    }

    #[test]
    fn test_boundary_event_on_non_wait_activity_rejected() {
        let mut graph = FlowGraph::new("bad-boundary");
        graph.add_flow_object(FlowObject::new(
            "t1",
            "Auto",
            FlowObjectKind::Task(TaskKind::Service),
        ));
        graph.add_flow_object(FlowObject::new(
            "b1",
            "Timeout",
            FlowObjectKind::BoundaryEvent {
                attached_to: FlowObjectId::new("t1"),
                timer: true,
            },
        ));

        let auto = graph.by_name("Auto").unwrap();
        assert!(matches!(
            graph.boundary_events_attached_to(auto),
            Err(EngineError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_sole_start_event() {
        let graph = linear_graph();
        assert_eq!(graph.sole_start_event().unwrap().name, "Start");

        let mut no_start = FlowGraph::new("no-start");
        no_start.add_flow_object(FlowObject::new("e1", "End", FlowObjectKind::EndEvent));
        assert!(no_start.sole_start_event().is_err());

        let mut two_starts = linear_graph();
        two_starts.add_flow_object(FlowObject::new("s2", "Start2", FlowObjectKind::StartEvent));
        assert!(two_starts.sole_start_event().is_err());
    }

    #[test]
    fn test_task_kind_wait_semantics() {
        assert!(TaskKind::User.is_wait());
        assert!(TaskKind::Receive.is_wait());
        assert!(!TaskKind::Service.is_wait());
        assert!(TaskKind::Manual.has_done_handler());
        assert!(!TaskKind::Receive.has_done_handler());
    }
}
