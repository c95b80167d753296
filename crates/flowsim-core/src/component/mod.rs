//! Flow components: the physical elements that hand payloads to one another.
//!
//! The component set is closed. Every element lives in the graph's arena as
//! a [`Component`] variant and refers to its neighbours by [`ComponentId`].
//! The capability surface shared by all of them is [`FlowComponent`].
//!
//! Cross-component handoff (`accept`) is synchronous and never suspends;
//! only the orchestrating loops (conveyor shift, buffer handoff, depalletizer
//! cycle, batch accumulation, junction routing) suspend on the scheduler.

pub mod batch_builder;
pub mod buffer;
pub mod conveyor;
pub mod depalletizer;
pub mod junction;

pub use batch_builder::{BatchBuilder, BuilderState};
pub use buffer::{Buffer, HandoffState};
pub use conveyor::{Conveyor, MAX_CONVEYOR_SLOTS};
pub use depalletizer::{DepalState, Depalletizer};
pub use junction::{Junction, JunctionState};

use crate::config::SimConfig;
use crate::event::{Event, EventBus};
use crate::fixed::SimTime;
use crate::graph::GraphError;
use crate::id::{ComponentId, IdGenerator};
use crate::sim::Scheduler;
use crate::unit::{Coord, Payload, UnitStore};
use std::collections::BTreeMap;

/// Name of the unnamed default output.
pub const DEFAULT_PORT: &str = "out";

// ---------------------------------------------------------------------------
// Shared model state handed to components
// ---------------------------------------------------------------------------

/// Mutable access to everything a component touches besides the graph
/// itself: clock, unit store, notification bus and id source.
pub struct Ctx<'a> {
    pub sched: &'a mut Scheduler,
    pub units: &'a mut UnitStore,
    pub bus: &'a mut EventBus,
    pub ids: &'a mut IdGenerator,
    pub config: &'a SimConfig,
}

impl Ctx<'_> {
    pub fn now(&self) -> SimTime {
        self.sched.now()
    }

    pub fn publish(&mut self, event: Event) {
        self.bus.publish(event);
    }

    /// Record that `payload` now sits at `coord` inside `component`. Loose
    /// items carry no location.
    pub fn relocate(&mut self, payload: Payload, component: ComponentId, coord: Coord) {
        let Payload::Unit(id) = payload else {
            return;
        };
        if let Some(unit) = self.units.get_mut(&id) {
            unit.relocate(component, coord);
            let time = self.sched.now();
            self.bus.publish(Event::MovePayload {
                id,
                coords: coord,
                time,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Named output ports. Each port is set exactly once at assembly time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outputs {
    ports: BTreeMap<String, ComponentId>,
}

impl Outputs {
    pub fn connect(&mut self, owner: &str, port: &str, to: ComponentId) -> Result<(), GraphError> {
        if self.ports.contains_key(port) {
            return Err(GraphError::PortAlreadyConnected {
                component: owner.to_string(),
                port: port.to_string(),
            });
        }
        self.ports.insert(port.to_string(), to);
        Ok(())
    }

    pub fn get(&self, port: &str) -> Option<ComponentId> {
        self.ports.get(port).copied()
    }

    /// Ports in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ComponentId)> {
        self.ports.iter().map(|(p, &id)| (p.as_str(), id))
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// What every physical element can do.
pub trait FlowComponent {
    fn id(&self) -> ComponentId;

    fn name(&self) -> &str;

    /// Grid position of the element (a conveyor reports its infeed).
    fn coord(&self) -> Coord;

    /// Whether `payload` would be taken right now.
    fn can_accept(&self, payload: Payload) -> bool;

    /// Take `payload`. Returns `false` (and changes nothing) when full; the
    /// caller is expected to back off and retry.
    fn accept(&mut self, ctx: &mut Ctx<'_>, payload: Payload) -> bool;

    /// Wire an output port to a downstream component.
    fn connect(&mut self, port: &str, to: ComponentId) -> Result<(), GraphError>;

    /// Every connected output, sorted by port name.
    fn outputs(&self) -> Vec<(String, ComponentId)>;
}

// ---------------------------------------------------------------------------
// Closed component set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Buffer,
    Conveyor,
    Depalletizer,
    BatchBuilder,
    Junction,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Buffer => "buffer",
            ComponentKind::Conveyor => "conveyor",
            ComponentKind::Depalletizer => "depalletizer",
            ComponentKind::BatchBuilder => "batch_builder",
            ComponentKind::Junction => "junction",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Component {
    Buffer(Buffer),
    Conveyor(Conveyor),
    Depalletizer(Depalletizer),
    BatchBuilder(BatchBuilder),
    Junction(Junction),
}

macro_rules! each_component {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            Component::Buffer($c) => $body,
            Component::Conveyor($c) => $body,
            Component::Depalletizer($c) => $body,
            Component::BatchBuilder($c) => $body,
            Component::Junction($c) => $body,
        }
    };
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Buffer(_) => ComponentKind::Buffer,
            Component::Conveyor(_) => ComponentKind::Conveyor,
            Component::Depalletizer(_) => ComponentKind::Depalletizer,
            Component::BatchBuilder(_) => ComponentKind::BatchBuilder,
            Component::Junction(_) => ComponentKind::Junction,
        }
    }

    /// The slot buffer of this component: itself for a plain buffer, the
    /// embedded one for composite elements. Conveyors have none.
    pub fn buffer(&self) -> Option<&Buffer> {
        match self {
            Component::Buffer(b) => Some(b),
            Component::Depalletizer(d) => Some(d.buffer()),
            Component::BatchBuilder(b) => Some(b.buffer()),
            Component::Junction(j) => Some(j.buffer()),
            Component::Conveyor(_) => None,
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut Buffer> {
        match self {
            Component::Buffer(b) => Some(b),
            Component::Depalletizer(d) => Some(d.buffer_mut()),
            Component::BatchBuilder(b) => Some(b.buffer_mut()),
            Component::Junction(j) => Some(j.buffer_mut()),
            Component::Conveyor(_) => None,
        }
    }

    pub fn as_conveyor(&self) -> Option<&Conveyor> {
        match self {
            Component::Conveyor(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_depalletizer(&self) -> Option<&Depalletizer> {
        match self {
            Component::Depalletizer(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_batch_builder(&self) -> Option<&BatchBuilder> {
        match self {
            Component::BatchBuilder(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_junction(&self) -> Option<&Junction> {
        match self {
            Component::Junction(j) => Some(j),
            _ => None,
        }
    }

    /// Every payload currently held, in slot order.
    pub fn contents(&self) -> Vec<Payload> {
        match self {
            Component::Conveyor(c) => c.slots().iter().flatten().copied().chain(c.releasing()).collect(),
            other => other.buffer().and_then(Buffer::payload).into_iter().collect(),
        }
    }
}

impl FlowComponent for Component {
    fn id(&self) -> ComponentId {
        each_component!(self, c => c.id())
    }

    fn name(&self) -> &str {
        each_component!(self, c => c.name())
    }

    fn coord(&self) -> Coord {
        each_component!(self, c => c.coord())
    }

    fn can_accept(&self, payload: Payload) -> bool {
        each_component!(self, c => c.can_accept(payload))
    }

    fn accept(&mut self, ctx: &mut Ctx<'_>, payload: Payload) -> bool {
        each_component!(self, c => c.accept(ctx, payload))
    }

    fn connect(&mut self, port: &str, to: ComponentId) -> Result<(), GraphError> {
        each_component!(self, c => c.connect(port, to))
    }

    fn outputs(&self) -> Vec<(String, ComponentId)> {
        each_component!(self, c => c.outputs())
    }
}
