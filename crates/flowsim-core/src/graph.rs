use crate::component::{
    BatchBuilder, Buffer, Component, Conveyor, Depalletizer, FlowComponent, Junction,
};
use crate::id::ComponentId;
use crate::unit::Coord;
use slotmap::SlotMap;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Assembly errors: anything wrong with the shape of the factory graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("unknown component: {0}")]
    UnknownComponent(String),
    #[error("component id not in graph: {0:?}")]
    UnknownId(ComponentId),
    #[error("duplicate component name: {0}")]
    DuplicateName(String),
    #[error("unknown component type: {0}")]
    UnknownComponentType(String),
    #[error("{component} has no port {port:?}")]
    UnknownPort { component: String, port: String },
    #[error("{component}: port {port:?} is already connected")]
    PortAlreadyConnected { component: String, port: String },
    #[error("{component}: port {port:?} is not connected")]
    PortNotConnected { component: String, port: String },
    #[error("{0} cannot connect to itself")]
    SelfLoop(String),
    #[error("conveyor {name} from {start} to {end} is not axis aligned")]
    NotAxisAligned { name: String, start: Coord, end: Coord },
    #[error("conveyor {name} from {start} to {end} is longer than {max} slots")]
    ConveyorTooLong {
        name: String,
        start: Coord,
        end: Coord,
        max: u32,
    },
    #[error("junction {name}: invalid ratio {ratio:?}")]
    InvalidRatio { name: String, ratio: Vec<u32> },
    #[error("{name} is a {actual}, expected a {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("graph is frozen after start")]
    Frozen,
}

// ---------------------------------------------------------------------------
// FlowGraph
// ---------------------------------------------------------------------------

/// Arena of all flow components, addressed by [`ComponentId`] and by name.
///
/// Components refer to their neighbours by id only, so the graph may contain
/// cycles (pallet return loops) without any ownership cycle. Once the
/// factory starts the graph is frozen: no components or links can be added.
#[derive(Debug, Default)]
pub struct FlowGraph {
    components: SlotMap<ComponentId, Component>,
    names: HashMap<String, ComponentId>,
    frozen: bool,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a component built by `build`, which receives the id the
    /// component will live under.
    pub fn insert<F>(&mut self, name: &str, build: F) -> Result<ComponentId, GraphError>
    where
        F: FnOnce(ComponentId) -> Result<Component, GraphError>,
    {
        if self.frozen {
            return Err(GraphError::Frozen);
        }
        if self.names.contains_key(name) {
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        let id = self.components.try_insert_with_key(build)?;
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Wire `from`'s output `port` to `to`.
    pub fn connect(&mut self, from: ComponentId, to: ComponentId, port: &str) -> Result<(), GraphError> {
        if self.frozen {
            return Err(GraphError::Frozen);
        }
        if !self.components.contains_key(to) {
            return Err(GraphError::UnknownId(to));
        }
        let source = self.components.get_mut(from).ok_or(GraphError::UnknownId(from))?;
        if from == to {
            return Err(GraphError::SelfLoop(source.name().to_string()));
        }
        source.connect(port, to)
    }

    pub fn get(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn get_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.get_mut(id)
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.contains_key(id)
    }

    pub fn id_of(&self, name: &str) -> Option<ComponentId> {
        self.names.get(name).copied()
    }

    /// Like [`FlowGraph::id_of`] but as an assembly error.
    pub fn resolve(&self, name: &str) -> Result<ComponentId, GraphError> {
        self.id_of(name)
            .ok_or_else(|| GraphError::UnknownComponent(name.to_string()))
    }

    pub fn name_of(&self, id: ComponentId) -> Option<&str> {
        self.components.get(id).map(|c| c.name())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, &Component)> {
        self.components.iter()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    // -- typed access ------------------------------------------------------

    /// The buffer of a component: a standalone buffer or the one embedded in
    /// a depalletizer, batch builder or junction.
    pub fn buffer(&self, id: ComponentId) -> Option<&Buffer> {
        self.components.get(id).and_then(Component::buffer)
    }

    pub fn buffer_mut(&mut self, id: ComponentId) -> Option<&mut Buffer> {
        self.components.get_mut(id).and_then(Component::buffer_mut)
    }

    pub fn conveyor(&self, id: ComponentId) -> Option<&Conveyor> {
        self.components.get(id).and_then(Component::as_conveyor)
    }

    pub fn conveyor_mut(&mut self, id: ComponentId) -> Option<&mut Conveyor> {
        match self.components.get_mut(id) {
            Some(Component::Conveyor(c)) => Some(c),
            _ => None,
        }
    }

    pub fn depalletizer(&self, id: ComponentId) -> Option<&Depalletizer> {
        self.components.get(id).and_then(Component::as_depalletizer)
    }

    pub fn depalletizer_mut(&mut self, id: ComponentId) -> Option<&mut Depalletizer> {
        match self.components.get_mut(id) {
            Some(Component::Depalletizer(d)) => Some(d),
            _ => None,
        }
    }

    pub fn batch_builder(&self, id: ComponentId) -> Option<&BatchBuilder> {
        self.components.get(id).and_then(Component::as_batch_builder)
    }

    pub fn batch_builder_mut(&mut self, id: ComponentId) -> Option<&mut BatchBuilder> {
        match self.components.get_mut(id) {
            Some(Component::BatchBuilder(b)) => Some(b),
            _ => None,
        }
    }

    pub fn junction(&self, id: ComponentId) -> Option<&Junction> {
        self.components.get(id).and_then(Component::as_junction)
    }

    pub fn junction_mut(&mut self, id: ComponentId) -> Option<&mut Junction> {
        match self.components.get_mut(id) {
            Some(Component::Junction(j)) => Some(j),
            _ => None,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
