//! Depalletizer: unloads a refill pallet item by item, then sends the empty
//! pallet on.
//!
//! One pallet cycle runs
//! `WaitForPallet -> StartupDelay -> UnloadingItems -> HandoffEmptyPallet`.
//! Each item costs `item_process_time`; an item the downstream rejects is
//! offered again after another `item_process_time` and only counts once it
//! has been accepted. The empty pallet leaves through the embedded buffer.
//!
//! Ports: `item_out` is wired directly; `pallet_out` and `out` are wired to
//! the embedded buffer.

use super::buffer::Buffer;
use super::{Ctx, DEFAULT_PORT, FlowComponent};
use crate::engine::Engine;
use crate::fixed::{SimTime, scale};
use crate::graph::GraphError;
use crate::id::{ComponentId, ItemId, OrderId, SignalId, UnitId};
use crate::order::{OrderKind, OrderStatus};
use crate::sim::{ProcessId, Resume, ScheduledEvent};
use crate::unit::{Coord, Payload};
use tracing::{debug, info, warn};

pub const ITEM_PORT: &str = "item_out";
pub const PALLET_PORT: &str = "pallet_out";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepalState {
    WaitForPallet { arrival: SignalId },
    StartupDelay,
    UnloadingItems,
    HandoffEmptyPallet { done: SignalId },
}

#[derive(Debug, Clone)]
pub struct Depalletizer {
    id: ComponentId,
    name: String,
    coord: Coord,
    item_process_time: SimTime,
    start_delay: SimTime,
    buffer: Buffer,
    item_out: Option<ComponentId>,
    state: Option<DepalState>,
    pallet: Option<UnitId>,
    order: Option<OrderId>,
    current_item: Option<ItemId>,
    remaining_qty: u32,
}

impl Depalletizer {
    pub fn new(
        id: ComponentId,
        name: impl Into<String>,
        coord: Coord,
        pallet_process_time: SimTime,
        item_process_time: SimTime,
        start_delay: SimTime,
    ) -> Self {
        let name = name.into();
        let buffer = Buffer::new(id, format!("{name}_buf"), coord, pallet_process_time);
        Self {
            id,
            name,
            coord,
            item_process_time,
            start_delay,
            buffer,
            item_out: None,
            state: None,
            pallet: None,
            order: None,
            current_item: None,
            remaining_qty: 0,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    /// `None` until the factory starts.
    pub fn state(&self) -> Option<DepalState> {
        self.state
    }

    pub fn pallet(&self) -> Option<UnitId> {
        self.buffer.payload().and_then(Payload::unit)
    }

    pub fn current_item(&self) -> Option<ItemId> {
        self.current_item
    }

    pub fn remaining_qty(&self) -> u32 {
        self.remaining_qty
    }

    /// Expected time until the current pallet is unloaded and gone.
    pub fn current_process_time_left(&self) -> SimTime {
        if self.buffer.payload().is_none() {
            return SimTime::ZERO;
        }
        scale(self.item_process_time, self.remaining_qty) + self.buffer.process_time()
    }

    fn wait_for_pallet(&mut self, ctx: &mut Ctx<'_>) {
        let arrival = self.buffer.wait_for_load(ctx, ProcessId::Depalletizer(self.id));
        self.state = Some(DepalState::WaitForPallet { arrival });
    }
}

impl FlowComponent for Depalletizer {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn coord(&self) -> Coord {
        self.coord
    }

    fn can_accept(&self, payload: Payload) -> bool {
        matches!(payload, Payload::Unit(_)) && self.buffer.can_accept(payload)
    }

    fn accept(&mut self, ctx: &mut Ctx<'_>, payload: Payload) -> bool {
        self.can_accept(payload) && self.buffer.accept(ctx, payload)
    }

    fn connect(&mut self, port: &str, to: ComponentId) -> Result<(), GraphError> {
        match port {
            PALLET_PORT | DEFAULT_PORT => self.buffer.connect(DEFAULT_PORT, to),
            ITEM_PORT => match self.item_out {
                Some(_) => Err(GraphError::PortAlreadyConnected {
                    component: self.name.clone(),
                    port: port.to_string(),
                }),
                None => {
                    self.item_out = Some(to);
                    Ok(())
                }
            },
            _ => Err(GraphError::UnknownPort {
                component: self.name.clone(),
                port: port.to_string(),
            }),
        }
    }

    fn outputs(&self) -> Vec<(String, ComponentId)> {
        let mut out: Vec<_> = self
            .buffer
            .output(DEFAULT_PORT)
            .map(|id| (PALLET_PORT.to_string(), id))
            .into_iter()
            .collect();
        if let Some(id) = self.item_out {
            out.insert(0, (ITEM_PORT.to_string(), id));
        }
        out
    }
}

/// Begin the pallet cycle.
pub(crate) fn start(engine: &mut Engine, id: ComponentId) {
    let (graph, mut ctx) = engine.split();
    if let Some(depal) = graph.depalletizer_mut(id) {
        depal.wait_for_pallet(&mut ctx);
    }
}

pub(crate) fn resume(engine: &mut Engine, id: ComponentId, event: &ScheduledEvent) {
    let Some(depal) = engine.graph.depalletizer(id) else {
        return;
    };
    let Some(state) = depal.state else {
        return;
    };
    match (state, event.resume) {
        (DepalState::WaitForPallet { arrival }, Resume::Signal(sig)) if sig == arrival => {
            let payload = engine.scheduler.release(arrival);
            pallet_arrived(engine, id, payload.and_then(Payload::unit));
        }
        (DepalState::StartupDelay, Resume::Timeout) => {
            let (name, item, qty) = (depal.name.clone(), depal.current_item, depal.remaining_qty);
            info!(t = %engine.now(), depalletizer = %name, ?item, qty, "started depalletizing");
            set_state(engine, id, DepalState::UnloadingItems);
            next_item(engine, id);
        }
        (DepalState::UnloadingItems, Resume::Timeout) => push_item(engine, id),
        (DepalState::HandoffEmptyPallet { done }, Resume::Signal(sig)) if sig == done => {
            engine.scheduler.release(done);
            let (graph, mut ctx) = engine.split();
            if let Some(depal) = graph.depalletizer_mut(id) {
                depal.pallet = None;
                depal.wait_for_pallet(&mut ctx);
            }
        }
        _ => {}
    }
}

fn set_state(engine: &mut Engine, id: ComponentId, state: DepalState) {
    if let Some(depal) = engine.graph.depalletizer_mut(id) {
        depal.state = Some(state);
    }
}

fn pallet_arrived(engine: &mut Engine, id: ComponentId, pallet: Option<UnitId>) {
    let order = pallet
        .and_then(|p| engine.units.get(&p))
        .and_then(|u| u.as_pallet())
        .and_then(|p| p.order());
    let refill = order.and_then(|o| engine.orders.get(o)).and_then(|o| match o.kind {
        OrderKind::Refill { item, qty } => Some((item, qty)),
        OrderKind::Opm { .. } => None,
    });
    let start_delay = {
        let Some(depal) = engine.graph.depalletizer_mut(id) else {
            return;
        };
        depal.pallet = pallet;
        depal.order = order;
        match refill {
            Some((item, qty)) => {
                depal.current_item = Some(item);
                depal.remaining_qty = qty;
                depal.state = Some(DepalState::StartupDelay);
                Some(depal.start_delay)
            }
            None => None,
        }
    };
    match start_delay {
        Some(delay) => {
            engine.scheduler.timeout(delay, ProcessId::Depalletizer(id));
        }
        None => {
            warn!(t = %engine.now(), ?pallet, "pallet without refill order at depalletizer, passing it on");
            hand_off_pallet(engine, id);
        }
    }
}

fn next_item(engine: &mut Engine, id: ComponentId) {
    let Some(depal) = engine.graph.depalletizer(id) else {
        return;
    };
    if depal.remaining_qty > 0 {
        let step = depal.item_process_time;
        engine.scheduler.timeout(step, ProcessId::Depalletizer(id));
    } else {
        finish_pallet(engine, id);
    }
}

fn push_item(engine: &mut Engine, id: ComponentId) {
    let Some(depal) = engine.graph.depalletizer(id) else {
        return;
    };
    let (Some(item), out, step) = (depal.current_item, depal.item_out, depal.item_process_time) else {
        finish_pallet(engine, id);
        return;
    };
    let accepted = out.is_some_and(|out| engine.accept(out, Payload::Item(item)));
    if accepted {
        if let Some(depal) = engine.graph.depalletizer_mut(id) {
            depal.remaining_qty -= 1;
            debug!(t = %engine.scheduler.now(), depalletizer = %depal.name, %item, left = depal.remaining_qty, "item out");
        }
        next_item(engine, id);
    } else {
        engine.scheduler.timeout(step, ProcessId::Depalletizer(id));
    }
}

fn finish_pallet(engine: &mut Engine, id: ComponentId) {
    let Some(depal) = engine.graph.depalletizer_mut(id) else {
        return;
    };
    depal.current_item = None;
    let (order, pallet, name) = (depal.order.take(), depal.pallet, depal.name.clone());
    if let Some(order) = order {
        engine.set_order_status(order, OrderStatus::Completed);
        info!(t = %engine.now(), depalletizer = %name, %order, "depalletized");
    }
    if let Some(pallet) = pallet.and_then(|p| engine.units.get_mut(&p)).and_then(|u| u.as_pallet_mut()) {
        pallet.clear_order();
    }
    hand_off_pallet(engine, id);
}

fn hand_off_pallet(engine: &mut Engine, id: ComponentId) {
    let (graph, mut ctx) = engine.split();
    if let Some(depal) = graph.depalletizer_mut(id) {
        let done = depal.buffer.start_handoff(&mut ctx, DEFAULT_PORT);
        ctx.sched.wait(done, ProcessId::Depalletizer(id));
        depal.state = Some(DepalState::HandoffEmptyPallet { done });
    }
}
