//! The construction and driving API.
//!
//! A [`Factory`] is built in two phases. During assembly, components are
//! added and wired, stock owners are bound to their buffers and initial
//! pallets can be placed. [`Factory::start`] then freezes the graph, starts
//! every loop at the current time and hands control to the clock, which is
//! driven with [`Factory::advance`], [`Factory::step_once`] or
//! [`Factory::run`].
//!
//! Buffered notifications are delivered to subscribers after every resumed
//! event.

use crate::catalogue::Catalogue;
use crate::component::{
    BatchBuilder, Buffer, Component, ComponentKind, Conveyor, Depalletizer, FlowComponent, Junction, depalletizer,
    junction,
};
use crate::config::{ConfigError, SimConfig};
use crate::engine::Engine;
use crate::event::EventBus;
use crate::fixed::{Priority, SimTime};
use crate::graph::{FlowGraph, GraphError};
use crate::id::{ComponentId, ItemId, OrderId, SignalId, UnitId};
use crate::inventory::{self, InventoryManager};
use crate::order::{Order, OrderBook, OrderError};
use crate::sim::{Horizon, ProcessId, RunOutcome, ScheduleError};
use crate::stock::{ItemWarehouse, ItemWarehouseBinding, Warehouse, WarehouseBinding, item_warehouse, warehouse};
use crate::unit::{Coord, Payload, TransportUnit};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("{owner} binding is unusable: {reason}")]
    MissingBinding { owner: &'static str, reason: String },
    #[error("a {0} is already configured")]
    DuplicateStockOwner(&'static str),
    #[error("{component} does not take {payload} right now")]
    Rejected { component: String, payload: Payload },
    #[error("unknown unit {0}")]
    UnknownUnit(UnitId),
    #[error("the simulation has already started")]
    AlreadyStarted,
    #[error("the simulation has not been started")]
    NotStarted,
}

/// A warehouse/factory model and its clock.
#[derive(Debug)]
pub struct Factory {
    engine: Engine,
    started: bool,
}

impl Factory {
    pub fn new(config: SimConfig, catalogue: Catalogue) -> Result<Self, FactoryError> {
        config.validate()?;
        Ok(Self {
            engine: Engine::new(config, catalogue),
            started: false,
        })
    }

    // -- assembly ----------------------------------------------------------

    /// A standalone pallet buffer.
    pub fn add_buffer(&mut self, name: &str, coord: Coord) -> Result<ComponentId, GraphError> {
        let process_time = self.engine.config.pallet_buffer_process_time;
        self.add_buffer_with(name, coord, process_time)
    }

    /// A standalone buffer with its own handoff delay.
    pub fn add_buffer_with(&mut self, name: &str, coord: Coord, process_time: SimTime) -> Result<ComponentId, GraphError> {
        self.engine
            .graph
            .insert(name, |id| Ok(Component::Buffer(Buffer::new(id, name, coord, process_time))))
    }

    pub fn add_conveyor(&mut self, name: &str, start: Coord, end: Coord) -> Result<ComponentId, GraphError> {
        let cycle = self.engine.config.conveyor_cycle_time;
        self.engine
            .graph
            .insert(name, |id| Conveyor::new(id, name, start, end, cycle).map(Component::Conveyor))
    }

    pub fn add_depalletizer(&mut self, name: &str, coord: Coord) -> Result<ComponentId, GraphError> {
        let c = &self.engine.config;
        let (pallet_time, item_time, delay) = (c.pallet_buffer_process_time, c.item_process_time, c.depalletizing_delay);
        self.engine.graph.insert(name, |id| {
            Ok(Component::Depalletizer(Depalletizer::new(
                id,
                name,
                coord,
                pallet_time,
                item_time,
                delay,
            )))
        })
    }

    pub fn add_batch_builder(&mut self, name: &str, coord: Coord) -> Result<ComponentId, GraphError> {
        let c = &self.engine.config;
        let (process_time, max_wait, max_items) = (c.batch_buffer_process_time, c.batch_max_wait_time, c.max_item_batch);
        self.engine.graph.insert(name, |id| {
            Ok(Component::BatchBuilder(BatchBuilder::new(
                id,
                name,
                coord,
                process_time,
                max_wait,
                max_items,
            )))
        })
    }

    pub fn add_junction(&mut self, name: &str, coord: Coord, ratio: Vec<u32>) -> Result<ComponentId, GraphError> {
        let c = &self.engine.config;
        let (process_time, retry) = (c.pallet_buffer_process_time, c.junction_retry_interval);
        self.engine.graph.insert(name, |id| {
            Junction::new(id, name, coord, ratio, process_time, retry).map(Component::Junction)
        })
    }

    /// Wire `from`'s output `port` to `to`.
    pub fn connect(&mut self, from: ComponentId, to: ComponentId, port: &str) -> Result<(), GraphError> {
        self.engine.graph.connect(from, to, port)
    }

    /// Add the pallet warehouse, with a full pool of empty pallets.
    pub fn add_warehouse(&mut self, binding: WarehouseBinding) -> Result<(), FactoryError> {
        self.ensure_assembling()?;
        if self.engine.warehouse.is_some() {
            return Err(FactoryError::DuplicateStockOwner("warehouse"));
        }
        self.expect_kind("warehouse", binding.input_buffer, ComponentKind::Buffer)?;
        self.expect_kind("warehouse", binding.output_buffer, ComponentKind::Buffer)?;
        if binding.input_buffer == binding.output_buffer {
            return Err(FactoryError::MissingBinding {
                owner: "warehouse",
                reason: "input and output must be different buffers".into(),
            });
        }
        let capacity = self.engine.config.warehouse_pallet_capacity;
        let pool: Vec<UnitId> = (0..capacity).map(|_| self.engine.create_pallet()).collect();
        self.engine.warehouse = Some(Warehouse::new(binding, capacity, pool));
        Ok(())
    }

    /// Add the item warehouse. Inputs must be buffers and outputs batch
    /// builders; each side needs at least one.
    pub fn add_item_warehouse(&mut self, binding: ItemWarehouseBinding) -> Result<(), FactoryError> {
        self.ensure_assembling()?;
        if self.engine.item_warehouse.is_some() {
            return Err(FactoryError::DuplicateStockOwner("item warehouse"));
        }
        if binding.input_buffers.is_empty() || binding.output_buffers.is_empty() {
            return Err(FactoryError::MissingBinding {
                owner: "item warehouse",
                reason: "needs at least one input buffer and one output buffer".into(),
            });
        }
        for &id in &binding.input_buffers {
            self.expect_kind("item warehouse", id, ComponentKind::Buffer)?;
        }
        for &id in &binding.output_buffers {
            self.expect_kind("item warehouse", id, ComponentKind::BatchBuilder)?;
        }
        let capacity = self.engine.config.item_warehouse_item_capacity;
        self.engine.item_warehouse = Some(ItemWarehouse::new(binding, capacity));
        Ok(())
    }

    /// Turn shortages into refill orders on a periodic scan.
    pub fn enable_auto_refill(&mut self) {
        self.engine.inventory.set_auto_refill(true);
    }

    fn ensure_assembling(&self) -> Result<(), FactoryError> {
        if self.started {
            return Err(FactoryError::AlreadyStarted);
        }
        Ok(())
    }

    fn expect_kind(&self, owner: &'static str, id: ComponentId, expected: ComponentKind) -> Result<(), FactoryError> {
        let Some(component) = self.engine.graph.get(id) else {
            return Err(FactoryError::MissingBinding {
                owner,
                reason: format!("{id:?} is not a component"),
            });
        };
        if component.kind() != expected {
            return Err(GraphError::WrongKind {
                name: component.name().to_string(),
                expected: expected.as_str(),
                actual: component.kind().as_str(),
            }
            .into());
        }
        Ok(())
    }

    // -- units -------------------------------------------------------------

    /// Create an empty pallet and load it into `at`.
    pub fn create_pallet(&mut self, at: ComponentId) -> Result<UnitId, FactoryError> {
        let pallet = self.engine.create_pallet();
        if let Err(err) = self.load(at, Payload::Unit(pallet)) {
            self.engine.units.remove(&pallet);
            return Err(err);
        }
        Ok(pallet)
    }

    /// Offer `payload` to a component.
    pub fn load(&mut self, component: ComponentId, payload: Payload) -> Result<(), FactoryError> {
        if let Payload::Unit(id) = payload
            && !self.engine.units.contains_key(&id)
        {
            return Err(FactoryError::UnknownUnit(id));
        }
        let name = self
            .engine
            .graph
            .name_of(component)
            .ok_or(GraphError::UnknownId(component))?
            .to_string();
        if !self.engine.accept(component, payload) {
            return Err(FactoryError::Rejected {
                component: name,
                payload,
            });
        }
        self.engine.bus.deliver();
        Ok(())
    }

    /// Start handing the payload of a buffer (standalone or embedded) on
    /// through `port`. The returned signal fires once it has moved.
    ///
    /// # Panics
    ///
    /// Panics if that buffer already has a handoff in flight.
    pub fn start_handoff(&mut self, buffer: ComponentId, port: &str) -> Result<SignalId, GraphError> {
        let (graph, mut ctx) = self.engine.split();
        let buffer = graph.buffer_mut(buffer).ok_or(GraphError::UnknownId(buffer))?;
        Ok(buffer.start_handoff(&mut ctx, port))
    }

    pub fn is_signal_triggered(&self, signal: SignalId) -> bool {
        self.engine.scheduler.is_triggered(signal)
    }

    // -- orders ------------------------------------------------------------

    /// Queue an OPM order at the item warehouse. Without an explicit
    /// priority the order's creation time is used.
    pub fn place_opm_order(
        &mut self,
        items: impl IntoIterator<Item = (ItemId, u32)>,
        priority: Option<Priority>,
    ) -> Result<OrderId, FactoryError> {
        let mut lines: BTreeMap<ItemId, u32> = BTreeMap::new();
        for (item, qty) in items {
            if !self.engine.catalogue.contains(item) {
                return Err(OrderError::UnknownItem(item).into());
            }
            *lines.entry(item).or_insert(0) += qty;
        }
        lines.retain(|_, qty| *qty > 0);
        if lines.is_empty() {
            return Err(OrderError::Empty.into());
        }
        if self.engine.item_warehouse.is_none() {
            return Err(OrderError::NoStockOwner("item warehouse").into());
        }

        let now = self.engine.now();
        let id = self.engine.ids.order();
        self.engine.orders.insert(Order::opm(id, lines, now));
        item_warehouse::place_order(&mut self.engine, id, priority.unwrap_or(now));
        info!(t = %now, order = %id, "opm order placed");
        self.engine.bus.deliver();
        Ok(id)
    }

    /// Split a refill request into pallet-sized orders on the warehouse
    /// queue.
    pub fn place_refill_order(&mut self, item: ItemId, qty: u32) -> Result<Vec<OrderId>, FactoryError> {
        let placed = inventory::place_refill_order(&mut self.engine, item, qty)?;
        self.engine.bus.deliver();
        Ok(placed)
    }

    /// Queue a single refill order of at most one pallet directly at the
    /// warehouse, with an explicit priority.
    pub fn place_warehouse_order(&mut self, item: ItemId, qty: u32, priority: Priority) -> Result<OrderId, FactoryError> {
        if qty == 0 {
            return Err(OrderError::Empty.into());
        }
        let c = &self.engine.config;
        let max = self
            .engine
            .catalogue
            .qty_per_pallet(item, c.pallet_max_volume, c.pallet_max_weight)
            .map_err(|_| OrderError::UnknownItem(item))?;
        if qty > max {
            return Err(OrderError::ExceedsPallet { item, qty, max }.into());
        }
        if self.engine.warehouse.is_none() {
            return Err(OrderError::NoStockOwner("warehouse").into());
        }

        let now = self.engine.now();
        let id = self.engine.ids.order();
        self.engine.orders.insert(Order::refill(id, item, qty, now));
        warehouse::place_order(&mut self.engine, id, priority);
        info!(t = %now, order = %id, %item, qty, "warehouse order placed");
        self.engine.bus.deliver();
        Ok(id)
    }

    // -- control -----------------------------------------------------------

    /// Freeze the graph and start every loop at the current time.
    pub fn start(&mut self) -> Result<(), FactoryError> {
        self.ensure_assembling()?;
        self.started = true;
        self.engine.graph.freeze();

        let components: Vec<(ComponentId, ComponentKind)> =
            self.engine.graph.iter().map(|(id, c)| (id, c.kind())).collect();
        for (id, kind) in components {
            match kind {
                ComponentKind::Conveyor => {
                    if let Some(cycle) = self.engine.graph.conveyor(id).map(Conveyor::cycle_time) {
                        self.engine.scheduler.timeout(cycle, ProcessId::ConveyorShift(id));
                    }
                }
                ComponentKind::Depalletizer => depalletizer::start(&mut self.engine, id),
                ComponentKind::Junction => junction::start(&mut self.engine, id),
                ComponentKind::Buffer | ComponentKind::BatchBuilder => {}
            }
        }
        warehouse::start(&mut self.engine);
        item_warehouse::start(&mut self.engine);
        inventory::start(&mut self.engine);
        info!(
            t = %self.engine.now(),
            components = self.engine.graph.len(),
            "simulation started"
        );
        self.engine.bus.deliver();
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Resume every event due up to and including `until`, then move the
    /// clock to `until`.
    pub fn advance(&mut self, until: SimTime) -> Result<RunOutcome, FactoryError> {
        self.run(Horizon::Until(until))
    }

    /// Resume the single next event. Returns its time, or `None` once the
    /// queue has drained.
    pub fn step_once(&mut self) -> Result<Option<SimTime>, FactoryError> {
        if !self.started {
            return Err(FactoryError::NotStarted);
        }
        let Some(event) = self.engine.scheduler.next_due(Horizon::Idle) else {
            return Ok(None);
        };
        self.engine.dispatch(&event);
        self.engine.bus.deliver();
        Ok(Some(event.time))
    }

    pub fn run(&mut self, horizon: Horizon) -> Result<RunOutcome, FactoryError> {
        if !self.started {
            return Err(FactoryError::NotStarted);
        }
        if let Horizon::Until(limit) = horizon
            && limit < self.engine.now()
        {
            return Err(ScheduleError::HorizonInPast {
                horizon: limit,
                now: self.engine.now(),
            }
            .into());
        }
        while let Some(event) = self.engine.scheduler.next_due(horizon) {
            self.engine.dispatch(&event);
            self.engine.bus.deliver();
        }
        Ok(match horizon {
            Horizon::Idle => RunOutcome::Exhausted,
            Horizon::Until(limit) => {
                self.engine.scheduler.advance_clock(limit);
                if self.engine.scheduler.pending() == 0 {
                    RunOutcome::Exhausted
                } else {
                    RunOutcome::HorizonReached
                }
            }
        })
    }

    /// End a batch builder's accumulation window now. Returns `false` when
    /// it has no open batch.
    pub fn release_batch(&mut self, builder: ComponentId) -> Result<bool, GraphError> {
        let kind = self.component_kind(builder)?;
        let (graph, mut ctx) = self.engine.split();
        let Some(b) = graph.batch_builder_mut(builder) else {
            return Err(GraphError::WrongKind {
                name: graph.name_of(builder).unwrap_or_default().to_string(),
                expected: ComponentKind::BatchBuilder.as_str(),
                actual: kind.as_str(),
            });
        };
        Ok(b.seal(&mut ctx))
    }

    /// Mark a junction port (un)available.
    pub fn set_port_available(&mut self, junction: ComponentId, port: &str, available: bool) -> Result<(), GraphError> {
        let kind = self.component_kind(junction)?;
        let graph = &mut self.engine.graph;
        let name = graph.name_of(junction).unwrap_or_default().to_string();
        match graph.junction_mut(junction) {
            Some(j) => j.set_port_available(port, available),
            None => Err(GraphError::WrongKind {
                name,
                expected: ComponentKind::Junction.as_str(),
                actual: kind.as_str(),
            }),
        }
    }

    fn component_kind(&self, id: ComponentId) -> Result<ComponentKind, GraphError> {
        self.engine
            .graph
            .get(id)
            .map(Component::kind)
            .ok_or(GraphError::UnknownId(id))
    }

    // -- read access -------------------------------------------------------

    pub fn now(&self) -> SimTime {
        self.engine.now()
    }

    pub fn config(&self) -> &SimConfig {
        &self.engine.config
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.engine.catalogue
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.engine.graph
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.engine.graph.get(id)
    }

    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.engine.graph.id_of(name)
    }

    pub fn unit(&self, id: UnitId) -> Option<&TransportUnit> {
        self.engine.units.get(&id)
    }

    pub fn units(&self) -> impl Iterator<Item = &TransportUnit> {
        self.engine.units.values()
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.engine.orders.get(id)
    }

    pub fn orders(&self) -> &OrderBook {
        &self.engine.orders
    }

    pub fn warehouse(&self) -> Option<&Warehouse> {
        self.engine.warehouse.as_ref()
    }

    pub fn item_warehouse(&self) -> Option<&ItemWarehouse> {
        self.engine.item_warehouse.as_ref()
    }

    pub fn inventory(&self) -> &InventoryManager {
        &self.engine.inventory
    }

    /// Events resumed so far.
    pub fn processed(&self) -> u64 {
        self.engine.scheduler.processed()
    }

    /// Events still queued.
    pub fn pending(&self) -> usize {
        self.engine.scheduler.pending()
    }

    /// The notification bus. Each topic buffers at most
    /// `SimConfig::event_buffer_capacity` events per kernel step; a burst
    /// above that drops the oldest and shows in [`EventBus::dropped_count`].
    pub fn event_bus(&self) -> &EventBus {
        &self.engine.bus
    }

    pub fn event_bus_mut(&mut self) -> &mut EventBus {
        &mut self.engine.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::CatalogueBuilder;
    use crate::component::DEFAULT_PORT;
    use crate::event::{Event, EventKind};
    use crate::fixed::time;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn catalogue() -> Catalogue {
        let mut b = CatalogueBuilder::new();
        b.item(1, "bolt", 1.0, 1.0);
        b.build().unwrap()
    }

    fn factory() -> Factory {
        Factory::new(SimConfig::default(), catalogue()).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SimConfig {
            poll_interval: SimTime::ZERO,
            ..SimConfig::default()
        };
        assert!(matches!(
            Factory::new(config, catalogue()),
            Err(FactoryError::Config(ConfigError::NonPositive { field: "poll_interval" }))
        ));
    }

    #[test]
    fn graph_is_frozen_after_start() {
        let mut f = factory();
        let a = f.add_buffer("a", Coord::new(0, 0)).unwrap();
        f.start().unwrap();
        assert_eq!(f.add_buffer("b", Coord::new(1, 0)), Err(GraphError::Frozen));
        assert_eq!(f.connect(a, a, DEFAULT_PORT), Err(GraphError::Frozen));
        assert!(matches!(f.start(), Err(FactoryError::AlreadyStarted)));
    }

    #[test]
    fn clock_needs_start() {
        let mut f = factory();
        assert!(matches!(f.advance(time(1.0)), Err(FactoryError::NotStarted)));
        assert!(matches!(f.step_once(), Err(FactoryError::NotStarted)));
    }

    #[test]
    fn warehouse_binding_is_checked() {
        let mut f = factory();
        let buffer = f.add_buffer("buf", Coord::new(0, 0)).unwrap();
        let conveyor = f.add_conveyor("c", Coord::new(1, 0), Coord::new(3, 0)).unwrap();
        let err = f
            .add_warehouse(WarehouseBinding {
                input_buffer: buffer,
                output_buffer: conveyor,
            })
            .unwrap_err();
        assert!(matches!(err, FactoryError::Graph(GraphError::WrongKind { expected: "buffer", .. })));
        assert!(f.warehouse().is_none());

        let err = f.add_item_warehouse(ItemWarehouseBinding::default()).unwrap_err();
        assert!(matches!(err, FactoryError::MissingBinding { .. }));
    }

    #[test]
    fn warehouse_starts_with_a_full_pool() {
        let mut f = factory();
        let input = f.add_buffer("in", Coord::new(0, 0)).unwrap();
        let output = f.add_buffer("out", Coord::new(1, 0)).unwrap();
        f.add_warehouse(WarehouseBinding {
            input_buffer: input,
            output_buffer: output,
        })
        .unwrap();
        assert_eq!(f.warehouse().unwrap().pallet_count(), 25);
        assert!(matches!(
            f.add_warehouse(WarehouseBinding {
                input_buffer: input,
                output_buffer: output,
            }),
            Err(FactoryError::DuplicateStockOwner("warehouse"))
        ));
    }

    #[test]
    fn load_into_full_buffer_is_rejected() {
        let mut f = factory();
        let b = f.add_buffer("b", Coord::new(0, 0)).unwrap();
        let first = f.create_pallet(b).unwrap();
        assert_eq!(f.unit(first).unwrap().location.component, Some(b));
        assert!(matches!(f.create_pallet(b), Err(FactoryError::Rejected { .. })));
        // The refused pallet is not left behind.
        assert_eq!(f.units().count(), 1);
    }

    #[test]
    fn opm_order_validation() {
        let mut f = factory();
        assert!(matches!(
            f.place_opm_order([(ItemId(9), 1)], None),
            Err(FactoryError::Order(OrderError::UnknownItem(ItemId(9))))
        ));
        assert!(matches!(
            f.place_opm_order([(ItemId(1), 0)], None),
            Err(FactoryError::Order(OrderError::Empty))
        ));
        assert!(matches!(
            f.place_opm_order([(ItemId(1), 2)], None),
            Err(FactoryError::Order(OrderError::NoStockOwner("item warehouse")))
        ));
    }

    #[test]
    fn handoff_moves_payload_and_notifies() {
        let mut f = factory();
        let a = f.add_buffer("a", Coord::new(0, 0)).unwrap();
        let b = f.add_buffer("b", Coord::new(1, 0)).unwrap();
        f.connect(a, b, DEFAULT_PORT).unwrap();
        let pallet = f.create_pallet(a).unwrap();

        let moves = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&moves);
        f.event_bus_mut().subscribe(
            EventKind::MovePayload,
            Box::new(move |e| {
                if let Event::MovePayload { id, coords, .. } = e {
                    sink.borrow_mut().push((*id, *coords));
                }
            }),
        );

        f.start().unwrap();
        let done = f.start_handoff(a, DEFAULT_PORT).unwrap();
        assert!(!f.is_signal_triggered(done));
        f.advance(time(3.0)).unwrap();
        assert!(f.is_signal_triggered(done));
        assert_eq!(f.unit(pallet).unwrap().location.component, Some(b));
        assert_eq!(moves.borrow().as_slice(), &[(pallet, Coord::new(1, 0))]);
        assert_eq!(f.now(), time(3.0));
    }

    #[test]
    fn advance_rejects_past_horizon() {
        let mut f = factory();
        f.start().unwrap();
        f.advance(time(5.0)).unwrap();
        assert!(matches!(
            f.advance(time(4.0)),
            Err(FactoryError::Schedule(ScheduleError::HorizonInPast { .. }))
        ));
    }

    #[test]
    fn release_batch_needs_a_builder() {
        let mut f = factory();
        let b = f.add_buffer("b", Coord::new(0, 0)).unwrap();
        let bb = f.add_batch_builder("bb", Coord::new(1, 0)).unwrap();
        assert!(matches!(f.release_batch(b), Err(GraphError::WrongKind { .. })));
        assert_eq!(f.release_batch(bb), Ok(false));
        assert!(matches!(
            f.set_port_available(b, "a", false),
            Err(GraphError::WrongKind { expected: "junction", .. })
        ));
    }
}
