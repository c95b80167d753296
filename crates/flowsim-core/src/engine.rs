//! The simulation engine: owns every piece of model state and routes each
//! scheduled event to the state machine it resumes.
//!
//! # Architecture
//!
//! The `Engine` owns:
//! - A [`FlowGraph`] (the arena of flow components)
//! - The [`Scheduler`] (clock, event queue, signals)
//! - The [`UnitStore`] of live pallets and batches
//! - The [`OrderBook`] of every order placed
//! - The stock owners ([`Warehouse`], [`ItemWarehouse`]) and the
//!   [`InventoryManager`]
//! - An [`EventBus`] for outbound notifications
//!
//! # Borrowing
//!
//! Component methods need the component mutably plus the clock, units and
//! bus. [`Engine::split`] hands out the graph and a [`Ctx`] over the rest as
//! disjoint borrows. Orchestrating loops that touch two components (a
//! handoff reading one buffer and filling another) copy what they need out
//! of the first component, release it, then go through [`Engine::accept`].

use crate::catalogue::Catalogue;
use crate::component::{
    Ctx, FlowComponent, batch_builder, buffer, conveyor, depalletizer, junction,
};
use crate::config::SimConfig;
use crate::event::{Event, EventBus};
use crate::fixed::SimTime;
use crate::graph::FlowGraph;
use crate::id::{IdGenerator, OrderId, UnitId};
use crate::inventory::{self, InventoryManager};
use crate::order::{OrderBook, OrderStatus};
use crate::sim::{ProcessId, ScheduledEvent, Scheduler};
use crate::stock::item_warehouse::{self, ItemWarehouse};
use crate::stock::warehouse::{self, Warehouse};
use crate::unit::{Location, Payload, TransportUnit, UnitStore};
use tracing::info;

#[derive(Debug)]
pub struct Engine {
    pub(crate) config: SimConfig,
    pub(crate) catalogue: Catalogue,
    pub(crate) scheduler: Scheduler,
    pub(crate) graph: FlowGraph,
    pub(crate) units: UnitStore,
    pub(crate) orders: OrderBook,
    pub(crate) bus: EventBus,
    pub(crate) ids: IdGenerator,
    pub(crate) warehouse: Option<Warehouse>,
    pub(crate) item_warehouse: Option<ItemWarehouse>,
    pub(crate) inventory: InventoryManager,
}

impl Engine {
    pub fn new(config: SimConfig, catalogue: Catalogue) -> Self {
        let bus = EventBus::new(config.event_buffer_capacity);
        Self {
            config,
            catalogue,
            scheduler: Scheduler::new(),
            graph: FlowGraph::new(),
            units: UnitStore::new(),
            orders: OrderBook::new(),
            bus,
            ids: IdGenerator::new(),
            warehouse: None,
            item_warehouse: None,
            inventory: InventoryManager::default(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    /// The graph and a context over everything else, borrowed disjointly.
    pub(crate) fn split(&mut self) -> (&mut FlowGraph, Ctx<'_>) {
        let ctx = Ctx {
            sched: &mut self.scheduler,
            units: &mut self.units,
            bus: &mut self.bus,
            ids: &mut self.ids,
            config: &self.config,
        };
        (&mut self.graph, ctx)
    }

    pub(crate) fn can_accept(&self, to: crate::id::ComponentId, payload: Payload) -> bool {
        self.graph.get(to).is_some_and(|c| c.can_accept(payload))
    }

    /// Offer `payload` to component `to`. `false` means it was not taken.
    pub(crate) fn accept(&mut self, to: crate::id::ComponentId, payload: Payload) -> bool {
        let (graph, mut ctx) = self.split();
        match graph.get_mut(to) {
            Some(component) => component.accept(&mut ctx, payload),
            None => false,
        }
    }

    /// Create an empty pallet that is not yet placed anywhere.
    pub(crate) fn create_pallet(&mut self) -> UnitId {
        let id = self.ids.pallet();
        self.units
            .insert(id, TransportUnit::pallet(id, Location::default()));
        id
    }

    /// Move an order forward and tell observers. Observers see the status
    /// change before any movement it causes, since callers publish it first.
    pub(crate) fn set_order_status(&mut self, id: OrderId, status: OrderStatus) {
        let now = self.scheduler.now();
        let Some(order) = self.orders.get_mut(id) else {
            return;
        };
        order.set_status(status, now);
        let completion_time = order.completed_at();
        info!(t = %now, order = %id, ?status, "order status");
        self.bus.publish(Event::UpdateOrder {
            order_id: id,
            status,
            completion_time,
            time: now,
        });
    }

    /// Resume whatever process `event` names.
    pub(crate) fn dispatch(&mut self, event: &ScheduledEvent) {
        match event.process {
            ProcessId::ConveyorShift(id) => conveyor::resume_shift(self, id),
            ProcessId::ConveyorRelease(id) => conveyor::resume_release(self, id),
            ProcessId::Handoff(id) => buffer::resume_handoff(self, id),
            ProcessId::Depalletizer(id) => depalletizer::resume(self, id, event),
            ProcessId::BatchBuilder(id) => batch_builder::resume(self, id, event),
            ProcessId::Junction(id) => junction::resume(self, id, event),
            ProcessId::WarehouseOrders => warehouse::resume_orders(self, event),
            ProcessId::WarehouseReturns => warehouse::resume_returns(self, event),
            ProcessId::ItemWarehouseInfeed(lane) => item_warehouse::resume_infeed(self, lane, event),
            ProcessId::ItemWarehouseSweep => item_warehouse::resume_sweep(self),
            ProcessId::ItemWarehousePicking(lane) => item_warehouse::resume_picking(self, lane, event),
            ProcessId::DemandScan => inventory::resume_scan(self),
            ProcessId::External(_) => {}
        }
    }
}
