//! Batch builder: gathers loose items into an [`ItemBatch`] and hands the
//! batch on once it is ready.
//!
//! The first item loaded into an empty builder creates the batch and starts
//! the accumulation window. The window ends when the batch reaches
//! `max_items`, when the `max_wait` watchdog fires, or when the owner seals
//! the batch early ([`BatchBuilder::seal`]). After that the batch is sealed:
//! further items are rejected until the handoff has completed and a new
//! batch can be started.
//!
//! [`ItemBatch`]: crate::unit::ItemBatch

use super::buffer::Buffer;
use super::{Ctx, DEFAULT_PORT, FlowComponent};
use crate::engine::Engine;
use crate::event::Event;
use crate::fixed::SimTime;
use crate::graph::GraphError;
use crate::id::{ComponentId, SignalId, UnitId};
use crate::sim::{ProcessId, Resume, ScheduledEvent};
use crate::unit::{BatchState, Coord, Location, Payload, TransportUnit};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Idle,
    /// A batch is open. `watchdog` is the sequence of the max-wait timeout.
    Accumulating { watchdog: u64, ready: SignalId },
    HandingOff { done: SignalId },
}

#[derive(Debug, Clone)]
pub struct BatchBuilder {
    id: ComponentId,
    name: String,
    coord: Coord,
    max_wait: SimTime,
    max_items: u32,
    buffer: Buffer,
    current: Option<UnitId>,
    sealed: bool,
    state: BuilderState,
}

impl BatchBuilder {
    pub fn new(
        id: ComponentId,
        name: impl Into<String>,
        coord: Coord,
        process_time: SimTime,
        max_wait: SimTime,
        max_items: u32,
    ) -> Self {
        let name = name.into();
        let buffer = Buffer::new(id, format!("{name}_buf"), coord, process_time);
        Self {
            id,
            name,
            coord,
            max_wait,
            max_items,
            buffer,
            current: None,
            sealed: false,
            state: BuilderState::Idle,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// The batch being built or handed on.
    pub fn current_batch(&self) -> Option<UnitId> {
        self.current
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// End the accumulation window now. Returns `false` when there is no
    /// open batch.
    pub fn seal(&mut self, ctx: &mut Ctx<'_>) -> bool {
        let Some(batch) = self.current else {
            return false;
        };
        if self.sealed {
            return false;
        }
        self.sealed = true;
        if let Some(ready) = ctx.units.get(&batch).and_then(|u| u.as_batch()).map(|b| b.ready_signal()) {
            ctx.sched.trigger(ready, None);
        }
        debug!(t = %ctx.now(), builder = %self.name, %batch, "batch sealed");
        true
    }

    fn open_batch(&mut self, ctx: &mut Ctx<'_>) -> Option<UnitId> {
        let id = ctx.ids.batch();
        let ready = ctx.sched.signal();
        let location = Location {
            component: Some(self.id),
            coord: self.coord,
        };
        ctx.units.insert(id, TransportUnit::batch(id, location, ready));
        if !self.buffer.accept(ctx, Payload::Unit(id)) {
            ctx.units.remove(&id);
            ctx.sched.release(ready);
            return None;
        }
        let now = ctx.now();
        ctx.publish(Event::BatchBuilderBuilding { id: self.id, time: now });
        ctx.publish(Event::CreateBatch { id, time: now });
        debug!(t = %now, builder = %self.name, batch = %id, "created batch");

        let process = ProcessId::BatchBuilder(self.id);
        let watchdog = ctx.sched.timeout(self.max_wait, process);
        ctx.sched.wait(ready, process);
        self.state = BuilderState::Accumulating { watchdog, ready };
        self.current = Some(id);
        self.sealed = false;
        Some(id)
    }
}

impl FlowComponent for BatchBuilder {
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
        if payload.item().is_none() {
            return false;
        }
        match self.current {
            Some(_) => !self.sealed,
            None => self.buffer.can_accept(payload) && !self.buffer.is_handing_off(),
        }
    }

    fn accept(&mut self, ctx: &mut Ctx<'_>, payload: Payload) -> bool {
        if !self.can_accept(payload) {
            return false;
        }
        let Payload::Item(item) = payload else {
            return false;
        };
        let batch = match self.current {
            Some(batch) => batch,
            None => match self.open_batch(ctx) {
                Some(batch) => batch,
                None => return false,
            },
        };
        let count = ctx
            .units
            .get_mut(&batch)
            .and_then(|u| u.as_batch_mut())
            .map(|b| b.add_item(item))
            .unwrap_or(0);
        if count >= self.max_items {
            self.seal(ctx);
        }
        true
    }

    fn connect(&mut self, port: &str, to: ComponentId) -> Result<(), GraphError> {
        if port != DEFAULT_PORT {
            return Err(GraphError::UnknownPort {
                component: self.name.clone(),
                port: port.to_string(),
            });
        }
        self.buffer.connect(DEFAULT_PORT, to)
    }

    fn outputs(&self) -> Vec<(String, ComponentId)> {
        self.buffer.outputs()
    }
}

pub(crate) fn resume(engine: &mut Engine, id: ComponentId, event: &ScheduledEvent) {
    let (graph, mut ctx) = engine.split();
    let Some(builder) = graph.batch_builder_mut(id) else {
        return;
    };
    match (builder.state, event.resume) {
        (BuilderState::Accumulating { watchdog, .. }, Resume::Timeout) if event.sequence == watchdog => {
            builder.seal(&mut ctx);
        }
        (BuilderState::Accumulating { ready, .. }, Resume::Signal(sig)) if sig == ready => {
            let done = builder.buffer.start_handoff(&mut ctx, DEFAULT_PORT);
            ctx.sched.wait(done, ProcessId::BatchBuilder(id));
            builder.state = BuilderState::HandingOff { done };
        }
        (BuilderState::HandingOff { done }, Resume::Signal(sig)) if sig == done => {
            ctx.sched.release(done);
            if let Some(batch) = builder.current.take() {
                if let Some(ready) = ctx.units.get(&batch).and_then(|u| u.as_batch()).map(|b| b.ready_signal()) {
                    ctx.sched.release(ready);
                }
                let now = ctx.now();
                ctx.publish(Event::UpdatePayload {
                    id: batch,
                    state: BatchState::Ready,
                    time: now,
                });
                debug!(t = %now, builder = %builder.name, %batch, "batch handed on");
            }
            builder.sealed = false;
            builder.state = BuilderState::Idle;
            let now = ctx.now();
            ctx.publish(Event::BatchBuilderIdle { id, time: now });
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::Catalogue;
    use crate::component::Component;
    use crate::config::SimConfig;
    use crate::event::EventKind;
    use crate::fixed::time;
    use crate::id::ItemId;
    use crate::sim::Horizon;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup(max_items: u32) -> (Engine, ComponentId, ComponentId) {
        let mut e = Engine::new(SimConfig::default(), Catalogue::default());
        let builder = e
            .graph
            .insert("bb", |id| {
                Ok(Component::BatchBuilder(BatchBuilder::new(
                    id,
                    "bb",
                    Coord::new(0, 0),
                    time(2.0),
                    time(10.0),
                    max_items,
                )))
            })
            .unwrap();
        let sink = e
            .graph
            .insert("sink", |id| {
                Ok(Component::Buffer(Buffer::new(id, "sink", Coord::new(1, 0), time(1.0))))
            })
            .unwrap();
        e.graph.connect(builder, sink, DEFAULT_PORT).unwrap();
        (e, builder, sink)
    }

    fn drain(e: &mut Engine, until: f64) {
        while let Some(ev) = e.scheduler.next_due(Horizon::Until(time(until))) {
            e.dispatch(&ev);
        }
    }

    #[test]
    fn first_item_creates_batch() {
        let (mut e, b, _) = setup(10);
        assert!(e.accept(b, Payload::Item(ItemId(7))));
        let batch = e.graph.batch_builder(b).unwrap().current_batch().unwrap();
        assert_eq!(batch, UnitId(20_000_001));
        assert_eq!(e.units[&batch].as_batch().unwrap().quantity(ItemId(7)), 1);
        assert!(e.accept(b, Payload::Item(ItemId(7))));
        assert_eq!(e.units[&batch].as_batch().unwrap().item_count(), 2);
    }

    #[test]
    fn rejects_units() {
        let (e, b, _) = setup(10);
        assert!(!e.can_accept(b, Payload::Unit(UnitId(10_000_001))));
    }

    #[test]
    fn full_batch_is_sealed_and_handed_on() {
        let (mut e, b, sink) = setup(3);
        for _ in 0..3 {
            assert!(e.accept(b, Payload::Item(ItemId(1))));
        }
        assert!(e.graph.batch_builder(b).unwrap().is_sealed());
        assert!(!e.accept(b, Payload::Item(ItemId(1))));

        drain(&mut e, 5.0);
        let batch = UnitId(20_000_001);
        assert_eq!(e.graph.buffer(sink).unwrap().payload(), Some(Payload::Unit(batch)));
        let builder = e.graph.batch_builder(b).unwrap();
        assert_eq!(builder.state(), BuilderState::Idle);
        assert!(builder.current_batch().is_none());
        // Handed on after the 2.0 processing delay.
        assert_eq!(e.units[&batch].location.component, Some(sink));
    }

    #[test]
    fn activity_is_published_around_each_batch() {
        let (mut e, b, _) = setup(2);
        let seen = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::BatchBuilderBuilding, EventKind::BatchBuilderIdle] {
            let seen = Rc::clone(&seen);
            e.bus.subscribe(kind, Box::new(move |ev| seen.borrow_mut().push(ev.clone())));
        }
        e.accept(b, Payload::Item(ItemId(1)));
        e.accept(b, Payload::Item(ItemId(1)));
        drain(&mut e, 5.0);
        e.bus.deliver();

        assert_eq!(
            *seen.borrow(),
            vec![
                Event::BatchBuilderBuilding { id: b, time: time(0.0) },
                Event::BatchBuilderIdle { id: b, time: time(2.0) },
            ]
        );
    }

    #[test]
    fn watchdog_releases_partial_batch() {
        let (mut e, b, sink) = setup(10);
        e.accept(b, Payload::Item(ItemId(1)));
        drain(&mut e, 9.5);
        assert_eq!(e.graph.buffer(sink).unwrap().payload(), None);
        drain(&mut e, 12.0);
        assert!(e.graph.buffer(sink).unwrap().payload().is_some());
    }

    #[test]
    fn early_seal_wins_over_watchdog() {
        let (mut e, b, sink) = setup(10);
        e.accept(b, Payload::Item(ItemId(1)));
        {
            let (graph, mut ctx) = e.split();
            assert!(graph.batch_builder_mut(b).unwrap().seal(&mut ctx));
        }
        drain(&mut e, 2.0);
        assert!(e.graph.buffer(sink).unwrap().payload().is_some());

        // A new batch started later gets its own watchdog; the stale one at
        // t=10 must not seal it.
        e.graph.buffer_mut(sink).unwrap().clear();
        drain(&mut e, 9.0);
        e.scheduler.advance_clock(time(9.0));
        e.accept(b, Payload::Item(ItemId(2)));
        drain(&mut e, 11.0);
        let builder = e.graph.batch_builder(b).unwrap();
        assert!(!builder.is_sealed());
        assert_eq!(builder.current_batch(), Some(UnitId(20_000_002)));
    }
}
