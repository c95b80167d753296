//! Item warehouse: stores loose items brought in as batches and releases
//! them again through batch builders to serve OPM orders.
//!
//! # Stock books
//!
//! `stock[item]` counts physical units; `available[item]` is what is left
//! after reservations. A batch arriving on an infeed lane adds to both. An
//! order accepted by the sweep reserves (lowers `available` only); picking
//! lowers `stock` one unit at a time as items leave. So
//! `available[item] <= stock[item]` always holds.
//!
//! # Loops
//!
//! - **infeed** (one per input buffer): wait for a batch, wait for item
//!   capacity, commit it, spend the batch processing time, clear the buffer.
//! - **sweep** (every `order_sweep_interval`): pop every backlog order.
//!   Orders whose every line is available are reserved and become
//!   processable; the rest go back, and the first time an order is found
//!   short a [`Shortage`] per missing item is recorded for the demand scan.
//! - **picking** (one per output batch builder): a lane takes one
//!   processable order at a time. Each distinct item costs one
//!   `item_process_time`, after which its units are loaded onto the
//!   builder. The order completes and the batch is sealed after the last
//!   unit; only then is the lane free again.

use super::OrderQueue;
use crate::engine::Engine;
use crate::event::{Event, fill_percent};
use crate::fixed::Priority;
use crate::id::{ComponentId, ItemId, OrderId, SignalId, UnitId};
use crate::order::OrderStatus;
use crate::sim::{ProcessId, Resume, ScheduledEvent};
use crate::unit::{Location, Payload};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, warn};

/// Which components an item warehouse works through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemWarehouseBinding {
    /// Buffers batches arrive on, one infeed lane each.
    pub input_buffers: Vec<ComponentId>,
    /// Batch builders orders are picked onto, one picking lane each.
    pub output_buffers: Vec<ComponentId>,
}

/// Unmet demand noticed by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortage {
    pub item: ItemId,
    pub missing: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfeedState {
    Idle,
    WaitForBatch { arrival: SignalId },
    /// The batch does not fit yet.
    WaitForRoom { batch: UnitId },
    Storing { batch: UnitId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickingState {
    Free,
    /// Spending the pick time for line `line` of the order.
    Picking { order: OrderId, line: usize },
    /// Loading the units of line `line`; `left` still to go.
    Loading { order: OrderId, line: usize, left: u32 },
}

#[derive(Debug, Clone)]
pub struct ItemWarehouse {
    binding: ItemWarehouseBinding,
    capacity: u64,
    item_count: u64,
    stock: BTreeMap<ItemId, u64>,
    available: BTreeMap<ItemId, u64>,
    backlog: OrderQueue,
    processable: VecDeque<OrderId>,
    seen_short: BTreeSet<OrderId>,
    requested: VecDeque<Shortage>,
    infeed: Vec<InfeedState>,
    picking: Vec<PickingState>,
}

impl ItemWarehouse {
    pub fn new(binding: ItemWarehouseBinding, capacity: u64) -> Self {
        let infeed = vec![InfeedState::Idle; binding.input_buffers.len()];
        let picking = vec![PickingState::Free; binding.output_buffers.len()];
        Self {
            binding,
            capacity,
            item_count: 0,
            stock: BTreeMap::new(),
            available: BTreeMap::new(),
            backlog: OrderQueue::new(),
            processable: VecDeque::new(),
            seen_short: BTreeSet::new(),
            requested: VecDeque::new(),
            infeed,
            picking,
        }
    }

    pub fn binding(&self) -> &ItemWarehouseBinding {
        &self.binding
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Physical units of `item` in store.
    pub fn stock(&self, item: ItemId) -> u64 {
        self.stock.get(&item).copied().unwrap_or(0)
    }

    /// Units of `item` not yet reserved.
    pub fn available(&self, item: ItemId) -> u64 {
        self.available.get(&item).copied().unwrap_or(0)
    }

    /// Every stocked item with `(stock, available)`.
    pub fn levels(&self) -> impl Iterator<Item = (ItemId, u64, u64)> + '_ {
        self.stock
            .iter()
            .map(|(&item, &stock)| (item, stock, self.available(item)))
    }

    pub fn backlog(&self) -> &OrderQueue {
        &self.backlog
    }

    /// Reserved orders waiting for a free picking lane.
    pub fn processable(&self) -> impl Iterator<Item = OrderId> + '_ {
        self.processable.iter().copied()
    }

    /// Shortages not yet picked up by the demand scan.
    pub fn requested(&self) -> impl Iterator<Item = &Shortage> {
        self.requested.iter()
    }

    pub(crate) fn drain_requested(&mut self) -> Vec<Shortage> {
        self.requested.drain(..).collect()
    }

    pub fn infeed_state(&self, lane: usize) -> Option<InfeedState> {
        self.infeed.get(lane).copied()
    }

    pub fn picking_state(&self, lane: usize) -> Option<PickingState> {
        self.picking.get(lane).copied()
    }

    /// Whether every line of an order is covered by available stock.
    fn has_sufficient_stock(&self, lines: &[(ItemId, u32)]) -> bool {
        lines
            .iter()
            .all(|&(item, qty)| self.available(item) >= u64::from(qty))
    }

    fn reserve(&mut self, lines: &[(ItemId, u32)]) {
        for &(item, qty) in lines {
            let slot = self.available.entry(item).or_insert(0);
            *slot -= u64::from(qty);
        }
    }

    fn shortages(&self, lines: &[(ItemId, u32)]) -> Vec<Shortage> {
        lines
            .iter()
            .filter_map(|&(item, qty)| {
                let have = self.available(item);
                let want = u64::from(qty);
                (have < want).then(|| Shortage {
                    item,
                    missing: u32::try_from(want - have).unwrap_or(u32::MAX),
                })
            })
            .collect()
    }

    fn commit(&mut self, items: &BTreeMap<ItemId, u32>) {
        for (&item, &qty) in items {
            *self.stock.entry(item).or_insert(0) += u64::from(qty);
            *self.available.entry(item).or_insert(0) += u64::from(qty);
            self.item_count += u64::from(qty);
        }
    }

    /// Take one picked unit out of the physical stock.
    fn take_unit(&mut self, item: ItemId) {
        if let Some(slot) = self.stock.get_mut(&item) {
            debug_assert!(*slot > 0, "picking {item} with no stock");
            *slot = slot.saturating_sub(1);
        }
        self.item_count = self.item_count.saturating_sub(1);
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Queue an OPM order in the backlog.
pub(crate) fn place_order(engine: &mut Engine, order: OrderId, priority: Priority) -> bool {
    let Some(iw) = engine.item_warehouse.as_mut() else {
        return false;
    };
    iw.backlog.push(order, priority);
    publish_order_count(engine);
    true
}

/// Publish the initial levels and start every loop.
pub(crate) fn start(engine: &mut Engine) {
    let Some(iw) = engine.item_warehouse.as_ref() else {
        return;
    };
    let lanes = iw.binding.input_buffers.len();
    publish_item_count(engine);
    publish_order_count(engine);
    for lane in 0..lanes {
        wait_for_batch(engine, lane);
    }
    engine.scheduler.schedule_now(ProcessId::ItemWarehouseSweep);
}

pub(crate) fn resume_sweep(engine: &mut Engine) {
    let interval = engine.config.order_sweep_interval;
    let Some(iw) = engine.item_warehouse.as_mut() else {
        return;
    };
    let before = iw.backlog.len();
    let mut accepted = Vec::new();
    for queued in iw.backlog.drain() {
        let lines = engine
            .orders
            .get(queued.order)
            .map(|o| o.lines())
            .unwrap_or_default();
        if iw.has_sufficient_stock(&lines) {
            iw.reserve(&lines);
            iw.processable.push_back(queued.order);
            accepted.push(queued.order);
            continue;
        }
        if iw.seen_short.insert(queued.order) {
            let short = iw.shortages(&lines);
            for s in &short {
                debug!(t = %engine.scheduler.now(), order = %queued.order, item = %s.item, missing = s.missing, "shortage");
            }
            iw.requested.extend(short);
        }
        iw.backlog.push(queued.order, queued.priority);
    }
    let changed = iw.backlog.len() != before;

    for order in accepted {
        engine.set_order_status(order, OrderStatus::InProgress);
    }
    if changed {
        publish_order_count(engine);
    }
    assign_orders(engine);
    engine.scheduler.timeout(interval, ProcessId::ItemWarehouseSweep);
}

/// Hand processable orders to free picking lanes, lowest lane first.
fn assign_orders(engine: &mut Engine) {
    let pick_time = engine.config.item_process_time;
    let Some(iw) = engine.item_warehouse.as_mut() else {
        return;
    };
    for lane in 0..iw.picking.len() {
        if iw.picking[lane] != PickingState::Free {
            continue;
        }
        let Some(order) = iw.processable.pop_front() else {
            break;
        };
        iw.picking[lane] = PickingState::Picking { order, line: 0 };
        engine
            .scheduler
            .timeout(pick_time, ProcessId::ItemWarehousePicking(lane));
        info!(t = %engine.scheduler.now(), %order, lane, "picking order");
    }
}

// ---------------------------------------------------------------------------
// Picking
// ---------------------------------------------------------------------------

pub(crate) fn resume_picking(engine: &mut Engine, lane: usize, event: &ScheduledEvent) {
    if event.resume != Resume::Timeout {
        return;
    }
    let Some(state) = engine.item_warehouse.as_ref().and_then(|iw| iw.picking_state(lane)) else {
        return;
    };
    match state {
        PickingState::Free => {}
        PickingState::Picking { order, line } => {
            let qty = line_of(engine, order, line).map_or(0, |(_, qty)| qty);
            load_units(engine, lane, order, line, qty);
        }
        PickingState::Loading { order, line, left } => load_units(engine, lane, order, line, left),
    }
}

fn line_of(engine: &Engine, order: OrderId, line: usize) -> Option<(ItemId, u32)> {
    engine
        .orders
        .get(order)
        .and_then(|o| o.lines().get(line).copied())
}

fn set_picking(engine: &mut Engine, lane: usize, state: PickingState) {
    if let Some(slot) = engine
        .item_warehouse
        .as_mut()
        .and_then(|iw| iw.picking.get_mut(lane))
    {
        *slot = state;
    }
}

/// Push the units of one line onto the lane's builder, backing off while it
/// refuses them.
fn load_units(engine: &mut Engine, lane: usize, order: OrderId, line: usize, mut left: u32) {
    let poll = engine.config.poll_interval;
    let pick_time = engine.config.item_process_time;
    let process = ProcessId::ItemWarehousePicking(lane);
    let Some(builder) = engine
        .item_warehouse
        .as_ref()
        .and_then(|iw| iw.binding.output_buffers.get(lane).copied())
    else {
        return;
    };
    let Some((item, _)) = line_of(engine, order, line) else {
        finish_order(engine, lane, order, builder);
        return;
    };

    while left > 0 {
        if !engine.accept(builder, Payload::Item(item)) {
            engine.scheduler.timeout(poll, process);
            set_picking(engine, lane, PickingState::Loading { order, line, left });
            return;
        }
        left -= 1;
        if let Some(iw) = engine.item_warehouse.as_mut() {
            iw.take_unit(item);
        }
    }
    publish_item_count(engine);

    if line_of(engine, order, line + 1).is_some() {
        engine.scheduler.timeout(pick_time, process);
        set_picking(engine, lane, PickingState::Picking { order, line: line + 1 });
    } else {
        finish_order(engine, lane, order, builder);
    }
}

fn finish_order(engine: &mut Engine, lane: usize, order: OrderId, builder: ComponentId) {
    engine.set_order_status(order, OrderStatus::Completed);
    {
        let (graph, mut ctx) = engine.split();
        if let Some(b) = graph.batch_builder_mut(builder) {
            b.seal(&mut ctx);
        }
    }
    info!(t = %engine.now(), %order, lane, "order picked");
    set_picking(engine, lane, PickingState::Free);
    assign_orders(engine);
}

// ---------------------------------------------------------------------------
// Infeed
// ---------------------------------------------------------------------------

pub(crate) fn resume_infeed(engine: &mut Engine, lane: usize, event: &ScheduledEvent) {
    let Some(state) = engine.item_warehouse.as_ref().and_then(|iw| iw.infeed_state(lane)) else {
        return;
    };
    match (state, event.resume) {
        (InfeedState::WaitForBatch { arrival }, Resume::Signal(sig)) if sig == arrival => {
            let payload = engine.scheduler.release(arrival);
            let batch = payload
                .and_then(Payload::unit)
                .filter(|id| engine.units.get(id).is_some_and(|u| u.as_batch().is_some()));
            match batch {
                Some(batch) => try_store(engine, lane, batch),
                None => reject_payload(engine, lane, payload),
            }
        }
        (InfeedState::WaitForRoom { batch }, Resume::Timeout) => try_store(engine, lane, batch),
        (InfeedState::Storing { batch }, Resume::Timeout) => stored(engine, lane, batch),
        _ => {}
    }
}

fn set_infeed(engine: &mut Engine, lane: usize, state: InfeedState) {
    if let Some(slot) = engine
        .item_warehouse
        .as_mut()
        .and_then(|iw| iw.infeed.get_mut(lane))
    {
        *slot = state;
    }
}

fn input_buffer(engine: &Engine, lane: usize) -> Option<ComponentId> {
    engine
        .item_warehouse
        .as_ref()
        .and_then(|iw| iw.binding.input_buffers.get(lane).copied())
}

fn wait_for_batch(engine: &mut Engine, lane: usize) {
    let Some(input) = input_buffer(engine, lane) else {
        return;
    };
    let arrival = {
        let (graph, mut ctx) = engine.split();
        let Some(buffer) = graph.buffer_mut(input) else {
            return;
        };
        buffer.wait_for_load(&mut ctx, ProcessId::ItemWarehouseInfeed(lane))
    };
    set_infeed(engine, lane, InfeedState::WaitForBatch { arrival });
}

fn try_store(engine: &mut Engine, lane: usize, batch: UnitId) {
    let poll = engine.config.poll_interval;
    let process_time = engine.config.batch_buffer_process_time;
    let process = ProcessId::ItemWarehouseInfeed(lane);
    let Some(items) = engine
        .units
        .get(&batch)
        .and_then(|u| u.as_batch())
        .map(|b| b.items().clone())
    else {
        return;
    };
    let incoming: u64 = items.values().map(|&q| u64::from(q)).sum();
    let Some(iw) = engine.item_warehouse.as_mut() else {
        return;
    };
    if iw.item_count + incoming > iw.capacity {
        engine.scheduler.timeout(poll, process);
        set_infeed(engine, lane, InfeedState::WaitForRoom { batch });
        return;
    }
    iw.commit(&items);
    publish_item_count(engine);
    engine.scheduler.timeout(process_time, process);
    set_infeed(engine, lane, InfeedState::Storing { batch });
}

fn stored(engine: &mut Engine, lane: usize, batch: UnitId) {
    let Some(input) = input_buffer(engine, lane) else {
        return;
    };
    if let Some(buffer) = engine.graph.buffer_mut(input) {
        buffer.clear();
    }
    let now = engine.now();
    engine.bus.publish(Event::StorePayload { id: batch, time: now });
    // The items now live in the stock books; the batch itself is gone.
    engine.units.remove(&batch);
    debug!(t = %now, %batch, lane, "stored batch");
    wait_for_batch(engine, lane);
}

fn reject_payload(engine: &mut Engine, lane: usize, payload: Option<Payload>) {
    if let Some(payload) = payload {
        warn!(t = %engine.now(), %payload, lane, "item warehouse infeed only takes batches, discarding");
        if let Some(input) = input_buffer(engine, lane)
            && let Some(buffer) = engine.graph.buffer_mut(input)
        {
            buffer.clear();
        }
        if let Payload::Unit(id) = payload
            && let Some(unit) = engine.units.get_mut(&id)
        {
            unit.location = Location::default();
        }
    }
    wait_for_batch(engine, lane);
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

fn publish_item_count(engine: &mut Engine) {
    let Some(iw) = engine.item_warehouse.as_ref() else {
        return;
    };
    let count = iw.item_count;
    let fill = fill_percent(count, iw.capacity);
    let now = engine.now();
    engine
        .bus
        .publish(Event::ItemWarehouseItemCount { count, fill, time: now });
}

fn publish_order_count(engine: &mut Engine) {
    let Some(iw) = engine.item_warehouse.as_ref() else {
        return;
    };
    let count = iw.backlog.len() as u64;
    let now = engine.now();
    engine
        .bus
        .publish(Event::ItemWarehouseOrderCount { count, time: now });
}
