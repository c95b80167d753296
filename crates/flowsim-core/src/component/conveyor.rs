//! Straight conveyor with discrete slots and a fixed cycle.
//!
//! Every `cycle_time` the conveyor shifts once:
//!
//! 1. If the outfeed slot is occupied and the output has room, the unit is
//!    taken off the belt and handed over in a zero-delay release event.
//! 2. Slots are walked from the outfeed back toward slot 1, moving each unit
//!    one slot forward into a free slot, so units pack toward the outfeed. A
//!    unit loaded into slot 0 at the current instant stays put this cycle.

use super::{Ctx, DEFAULT_PORT, FlowComponent};
use crate::engine::Engine;
use crate::event::Event;
use crate::fixed::SimTime;
use crate::graph::GraphError;
use crate::id::ComponentId;
use crate::sim::ProcessId;
use crate::unit::{Coord, Payload};
use tracing::debug;

/// Longest conveyor accepted, in slots.
pub const MAX_CONVEYOR_SLOTS: u32 = 1 << 16;

#[derive(Debug, Clone)]
pub struct Conveyor {
    id: ComponentId,
    name: String,
    start: Coord,
    end: Coord,
    cycle_time: SimTime,
    slots: Vec<Option<Payload>>,
    slot_coords: Vec<Coord>,
    /// Time of the most recent load into slot 0.
    loaded_at: Option<SimTime>,
    output: Option<ComponentId>,
    /// Unit taken off the outfeed, waiting for its release event.
    releasing: Option<Payload>,
}

impl Conveyor {
    /// Build a conveyor from `start` (infeed) to `end` (outfeed). The two
    /// points must share an axis; the slot count is their distance plus one
    /// and may not exceed [`MAX_CONVEYOR_SLOTS`].
    pub fn new(
        id: ComponentId,
        name: impl Into<String>,
        start: Coord,
        end: Coord,
        cycle_time: SimTime,
    ) -> Result<Self, GraphError> {
        let name = name.into();
        if start.x != end.x && start.y != end.y {
            return Err(GraphError::NotAxisAligned { name, start, end });
        }
        // Axis aligned, so one of the two differences is zero.
        let length = start.x.abs_diff(end.x).max(start.y.abs_diff(end.y));
        if length >= MAX_CONVEYOR_SLOTS {
            return Err(GraphError::ConveyorTooLong {
                name,
                start,
                end,
                max: MAX_CONVEYOR_SLOTS,
            });
        }
        let slot_coords = slot_coords(start, end, length);
        Ok(Self {
            id,
            name,
            start,
            end,
            cycle_time,
            slots: vec![None; slot_coords.len()],
            slot_coords,
            loaded_at: None,
            output: None,
            releasing: None,
        })
    }

    pub fn start(&self) -> Coord {
        self.start
    }

    pub fn end(&self) -> Coord {
        self.end
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn cycle_time(&self) -> SimTime {
        self.cycle_time
    }

    /// Read-only view of slot contents, infeed first.
    pub fn slots(&self) -> &[Option<Payload>] {
        &self.slots
    }

    pub fn slot_coords(&self) -> &[Coord] {
        &self.slot_coords
    }

    /// Unit already off the belt but not yet accepted downstream.
    pub fn releasing(&self) -> Option<Payload> {
        self.releasing
    }

    pub fn output(&self) -> Option<ComponentId> {
        self.output
    }

    fn last(&self) -> usize {
        self.slots.len() - 1
    }

    /// Pack units one slot toward the outfeed. Returns the moves made.
    fn pack(&mut self, now: SimTime) -> Vec<(Payload, Coord)> {
        let mut moves = Vec::new();
        for i in (1..self.slots.len()).rev() {
            if self.slots[i].is_some() || self.slots[i - 1].is_none() {
                continue;
            }
            if i - 1 == 0 && self.loaded_at == Some(now) {
                break;
            }
            let payload = self.slots[i - 1].take();
            self.slots[i] = payload;
            if let Some(p) = payload {
                moves.push((p, self.slot_coords[i]));
            }
        }
        moves
    }
}

/// Evenly spaced integer coordinates from `start` to `end`, inclusive.
/// Every step moves toward `end`, so no coordinate leaves the segment.
fn slot_coords(start: Coord, end: Coord, length: u32) -> Vec<Coord> {
    let (dx, dy) = (end.x.cmp(&start.x) as i32, end.y.cmp(&start.y) as i32);
    let mut at = start;
    let mut coords = Vec::with_capacity(length as usize + 1);
    coords.push(at);
    for _ in 0..length {
        at = Coord::new(at.x + dx, at.y + dy);
        coords.push(at);
    }
    coords
}

impl FlowComponent for Conveyor {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn coord(&self) -> Coord {
        self.start
    }

    fn can_accept(&self, _payload: Payload) -> bool {
        self.slots[0].is_none()
    }

    fn accept(&mut self, ctx: &mut Ctx<'_>, payload: Payload) -> bool {
        if self.slots[0].is_some() {
            return false;
        }
        self.slots[0] = Some(payload);
        self.loaded_at = Some(ctx.now());
        ctx.relocate(payload, self.id, self.slot_coords[0]);
        debug!(t = %ctx.now(), conveyor = %self.name, %payload, "loaded");
        true
    }

    fn connect(&mut self, port: &str, to: ComponentId) -> Result<(), GraphError> {
        if port != DEFAULT_PORT {
            return Err(GraphError::UnknownPort {
                component: self.name.clone(),
                port: port.to_string(),
            });
        }
        if self.output.is_some() {
            return Err(GraphError::PortAlreadyConnected {
                component: self.name.clone(),
                port: port.to_string(),
            });
        }
        self.output = Some(to);
        Ok(())
    }

    fn outputs(&self) -> Vec<(String, ComponentId)> {
        self.output
            .map(|id| (DEFAULT_PORT.to_string(), id))
            .into_iter()
            .collect()
    }
}

/// One shift cycle, then schedule the next.
pub(crate) fn resume_shift(engine: &mut Engine, id: ComponentId) {
    let Some(conveyor) = engine.graph.conveyor(id) else {
        return;
    };
    let cycle = conveyor.cycle_time;
    let candidate = match (conveyor.slots[conveyor.last()], conveyor.releasing, conveyor.output) {
        (Some(payload), None, Some(out)) => Some((payload, out)),
        _ => None,
    };
    let release = candidate.is_some_and(|(payload, out)| engine.can_accept(out, payload));

    let now = engine.now();
    let (graph, mut ctx) = engine.split();
    let Some(conveyor) = graph.conveyor_mut(id) else {
        return;
    };
    if release {
        let last = conveyor.last();
        conveyor.releasing = conveyor.slots[last].take();
        ctx.sched.schedule_now(ProcessId::ConveyorRelease(id));
    }
    for (payload, coord) in conveyor.pack(now) {
        if let Payload::Unit(unit) = payload
            && let Some(u) = ctx.units.get_mut(&unit)
        {
            u.location.coord = coord;
            ctx.publish(Event::MovePayload {
                id: unit,
                coords: coord,
                time: now,
            });
        }
        debug!(t = %now, conveyor = %conveyor.name, %payload, %coord, "shifted");
    }
    ctx.sched.timeout(cycle, ProcessId::ConveyorShift(id));
}

/// Hand the released unit to the output, retrying while it is full.
pub(crate) fn resume_release(engine: &mut Engine, id: ComponentId) {
    let poll = engine.config.poll_interval;
    let Some(conveyor) = engine.graph.conveyor(id) else {
        return;
    };
    let (Some(payload), Some(out)) = (conveyor.releasing, conveyor.output) else {
        return;
    };
    let name = conveyor.name.clone();
    if engine.accept(out, payload) {
        debug!(t = %engine.now(), conveyor = %name, %payload, "unloaded");
        if let Some(conveyor) = engine.graph.conveyor_mut(id) {
            conveyor.releasing = None;
        }
    } else {
        engine.scheduler.timeout(poll, ProcessId::ConveyorRelease(id));
    }
}
