//! Pallet warehouse: merges refill orders onto empty pallets and dispatches
//! them, and takes returned empty pallets back into its pool.
//!
//! Two loops run independently:
//!
//! - **orders** waits until the queue has an order, the output buffer is
//!   free and the pool has a pallet. It then places a pallet on the output
//!   buffer, merges the next order onto it, spends `order_merge_time` and
//!   hands the pallet off. With an empty queue the loop parks until an order
//!   is placed; otherwise it polls.
//! - **returns** waits for pallets on the input buffer and puts them back
//!   into the pool, waiting for pool space when it is full.

use super::OrderQueue;
use crate::component::{DEFAULT_PORT, FlowComponent};
use crate::engine::Engine;
use crate::event::{Event, fill_percent};
use crate::fixed::Priority;
use crate::id::{ComponentId, OrderId, SignalId, UnitId};
use crate::order::OrderStatus;
use crate::sim::{ProcessId, Resume, ScheduledEvent};
use crate::unit::{Destination, Location, Payload};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Which buffers a warehouse works through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarehouseBinding {
    /// Receives returned empty pallets.
    pub input_buffer: ComponentId,
    /// Where orders are merged onto pallets before dispatch.
    pub output_buffer: ComponentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderLoop {
    /// Nothing to do until an order is placed.
    Parked,
    /// Waiting for a pallet or a free output buffer.
    Polling,
    Merging { order: OrderId, pallet: UnitId },
    Dispatching { pallet: UnitId, done: SignalId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnLoop {
    Idle,
    WaitForPallet { arrival: SignalId },
    /// A returned pallet is waiting for room in the pool.
    PoolFull { pallet: UnitId },
}

#[derive(Debug, Clone)]
pub struct Warehouse {
    binding: WarehouseBinding,
    pool: VecDeque<UnitId>,
    capacity: usize,
    queue: OrderQueue,
    orders: OrderLoop,
    returns: ReturnLoop,
    dispatched: u64,
}

impl Warehouse {
    /// A warehouse whose pool starts with `pallets`.
    pub fn new(binding: WarehouseBinding, capacity: usize, pallets: impl IntoIterator<Item = UnitId>) -> Self {
        Self {
            binding,
            pool: pallets.into_iter().collect(),
            capacity,
            queue: OrderQueue::new(),
            orders: OrderLoop::Parked,
            returns: ReturnLoop::Idle,
            dispatched: 0,
        }
    }

    pub fn binding(&self) -> WarehouseBinding {
        self.binding
    }

    pub fn pallet_count(&self) -> usize {
        self.pool.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pallets(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.pool.iter().copied()
    }

    pub fn queue(&self) -> &OrderQueue {
        &self.queue
    }

    pub fn order_loop(&self) -> OrderLoop {
        self.orders
    }

    pub fn return_loop(&self) -> ReturnLoop {
        self.returns
    }

    /// Pallets sent out so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

/// Queue a refill order. Wakes the order loop if it is parked.
pub(crate) fn place_order(engine: &mut Engine, order: OrderId, priority: Priority) -> bool {
    let Some(wh) = engine.warehouse.as_mut() else {
        return false;
    };
    wh.queue.push(order, priority);
    let count = wh.queue.len() as u64;
    if wh.orders == OrderLoop::Parked {
        wh.orders = OrderLoop::Polling;
        engine.scheduler.schedule_now(ProcessId::WarehouseOrders);
    }
    let now = engine.now();
    engine.bus.publish(Event::WarehouseOrderCount { count, time: now });
    true
}

/// Publish the initial levels and start both loops.
pub(crate) fn start(engine: &mut Engine) {
    let Some(wh) = engine.warehouse.as_mut() else {
        return;
    };
    if wh.orders == OrderLoop::Parked && !wh.queue.is_empty() {
        wh.orders = OrderLoop::Polling;
        engine.scheduler.schedule_now(ProcessId::WarehouseOrders);
    }
    let count = wh.queue.len() as u64;
    let now = engine.now();
    engine.bus.publish(Event::WarehouseOrderCount { count, time: now });
    publish_pallet_count(engine);
    wait_for_return(engine);
}

pub(crate) fn resume_orders(engine: &mut Engine, event: &ScheduledEvent) {
    let Some(wh) = engine.warehouse.as_ref() else {
        return;
    };
    match (wh.orders, event.resume) {
        (OrderLoop::Polling, Resume::Timeout) => try_dispatch(engine),
        (OrderLoop::Merging { order, pallet }, Resume::Timeout) => dispatch_pallet(engine, order, pallet),
        (OrderLoop::Dispatching { pallet, done }, Resume::Signal(sig)) if sig == done => {
            engine.scheduler.release(done);
            debug!(t = %engine.now(), %pallet, "pallet left the warehouse");
            try_dispatch(engine);
        }
        _ => {}
    }
}

fn set_orders(engine: &mut Engine, state: OrderLoop) {
    if let Some(wh) = engine.warehouse.as_mut() {
        wh.orders = state;
    }
}

fn try_dispatch(engine: &mut Engine) {
    let poll = engine.config.poll_interval;
    let merge_time = engine.config.order_merge_time;
    let Some(wh) = engine.warehouse.as_ref() else {
        return;
    };
    let output = wh.binding.output_buffer;
    if wh.queue.is_empty() {
        set_orders(engine, OrderLoop::Parked);
        return;
    }
    let output_free = engine
        .graph
        .buffer(output)
        .is_some_and(|b| b.payload().is_none() && !b.is_handing_off());
    if wh.pool.is_empty() || !output_free {
        engine.scheduler.timeout(poll, ProcessId::WarehouseOrders);
        set_orders(engine, OrderLoop::Polling);
        return;
    }

    let Some(wh) = engine.warehouse.as_mut() else {
        return;
    };
    let (Some(pallet), Some(next)) = (wh.pool.pop_front(), wh.queue.pop()) else {
        return;
    };
    let order = next.order;
    let queued = wh.queue.len() as u64;

    if let Some(p) = engine.units.get_mut(&pallet).and_then(|u| u.as_pallet_mut()) {
        p.merge_order(order, Destination::Depalletizer);
    }
    engine.set_order_status(order, OrderStatus::InProgress);
    if !engine.accept(output, Payload::Unit(pallet)) {
        // Checked free above; nothing else runs in between.
        warn!(t = %engine.now(), %pallet, "output buffer refused pallet");
    }
    info!(t = %engine.now(), %order, %pallet, "merging order onto pallet");

    let now = engine.now();
    engine.bus.publish(Event::WarehouseOrderCount { count: queued, time: now });
    publish_pallet_count(engine);
    engine.scheduler.timeout(merge_time, ProcessId::WarehouseOrders);
    set_orders(engine, OrderLoop::Merging { order, pallet });
}

fn dispatch_pallet(engine: &mut Engine, order: OrderId, pallet: UnitId) {
    let Some(output) = engine.warehouse.as_ref().map(|wh| wh.binding.output_buffer) else {
        return;
    };
    let now = engine.now();
    engine.bus.publish(Event::DispatchPallet { id: pallet, time: now });
    debug!(t = %now, %order, %pallet, "dispatching pallet");
    let done = {
        let (graph, mut ctx) = engine.split();
        let Some(buffer) = graph.buffer_mut(output) else {
            return;
        };
        let done = buffer.start_handoff(&mut ctx, DEFAULT_PORT);
        ctx.sched.wait(done, ProcessId::WarehouseOrders);
        done
    };
    if let Some(wh) = engine.warehouse.as_mut() {
        wh.dispatched += 1;
        wh.orders = OrderLoop::Dispatching { pallet, done };
    }
}

// ---------------------------------------------------------------------------
// Returns
// ---------------------------------------------------------------------------

pub(crate) fn resume_returns(engine: &mut Engine, event: &ScheduledEvent) {
    let Some(wh) = engine.warehouse.as_ref() else {
        return;
    };
    match (wh.returns, event.resume) {
        (ReturnLoop::WaitForPallet { arrival }, Resume::Signal(sig)) if sig == arrival => {
            match engine.scheduler.release(arrival).and_then(Payload::unit) {
                Some(pallet) => take_return(engine, pallet),
                None => wait_for_return(engine),
            }
        }
        (ReturnLoop::PoolFull { pallet }, Resume::Timeout) => take_return(engine, pallet),
        _ => {}
    }
}

fn wait_for_return(engine: &mut Engine) {
    let Some(input) = engine.warehouse.as_ref().map(|wh| wh.binding.input_buffer) else {
        return;
    };
    let arrival = {
        let (graph, mut ctx) = engine.split();
        let Some(buffer) = graph.buffer_mut(input) else {
            return;
        };
        buffer.wait_for_load(&mut ctx, ProcessId::WarehouseReturns)
    };
    if let Some(wh) = engine.warehouse.as_mut() {
        wh.returns = ReturnLoop::WaitForPallet { arrival };
    }
}

fn take_return(engine: &mut Engine, pallet: UnitId) {
    let poll = engine.config.poll_interval;
    let Some(wh) = engine.warehouse.as_mut() else {
        return;
    };
    if wh.pool.len() >= wh.capacity {
        warn!(t = %engine.scheduler.now(), %pallet, "pallet pool is full, holding returned pallet");
        wh.returns = ReturnLoop::PoolFull { pallet };
        engine.scheduler.timeout(poll, ProcessId::WarehouseReturns);
        return;
    }
    let input = wh.binding.input_buffer;
    wh.pool.push_back(pallet);

    let coord = match engine.graph.buffer_mut(input) {
        Some(buffer) => {
            buffer.clear();
            buffer.coord()
        }
        None => Default::default(),
    };
    if let Some(unit) = engine.units.get_mut(&pallet) {
        unit.location = Location {
            component: None,
            coord,
        };
        if let Some(stale) = unit.as_pallet_mut().and_then(|p| p.clear_order()) {
            warn!(t = %engine.scheduler.now(), %pallet, order = %stale, "returned pallet still carried an order");
        }
    }
    debug!(t = %engine.now(), %pallet, "pallet returned to pool");
    publish_pallet_count(engine);
    wait_for_return(engine);
}

fn publish_pallet_count(engine: &mut Engine) {
    let Some(wh) = engine.warehouse.as_ref() else {
        return;
    };
    let count = wh.pool.len() as u64;
    let fill = fill_percent(count, wh.capacity as u64);
    let now = engine.now();
    engine.bus.publish(Event::WarehousePalletCount { count, fill, time: now });
}
