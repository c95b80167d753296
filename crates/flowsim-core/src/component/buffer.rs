//! Single-slot buffer with a suspending handoff.
//!
//! A buffer holds at most one payload. Owners that want to react to
//! arrivals call [`Buffer::wait_for_load`], which resolves with the payload
//! as soon as one is present and has not yet been observed.
//!
//! Handoff is a small state machine driven by [`ProcessId::Handoff`]:
//! `Polling` re-checks the chosen output every `poll_interval` until it can
//! accept, `Processing` spends the buffer's processing delay, then the
//! payload moves downstream and the completion signal fires with it.

use super::{Ctx, DEFAULT_PORT, FlowComponent, Outputs};
use crate::engine::Engine;
use crate::fixed::SimTime;
use crate::graph::GraphError;
use crate::id::{ComponentId, SignalId};
use crate::sim::ProcessId;
use crate::unit::{Coord, Payload};
use tracing::{debug, warn};

/// Progress of the in-flight handoff, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffState {
    Idle,
    /// Waiting for the output to have room.
    Polling {
        target: Option<ComponentId>,
        done: SignalId,
    },
    /// Spending the processing delay before the move.
    Processing {
        target: ComponentId,
        done: SignalId,
    },
}

#[derive(Debug, Clone)]
pub struct Buffer {
    id: ComponentId,
    name: String,
    coord: Coord,
    process_time: SimTime,
    payload: Option<Payload>,
    /// The payload arrived while nobody was waiting for it.
    fresh: bool,
    load_waiter: Option<SignalId>,
    outputs: Outputs,
    handoff: HandoffState,
}

impl Buffer {
    pub fn new(id: ComponentId, name: impl Into<String>, coord: Coord, process_time: SimTime) -> Self {
        Self {
            id,
            name: name.into(),
            coord,
            process_time,
            payload: None,
            fresh: false,
            load_waiter: None,
            outputs: Outputs::default(),
            handoff: HandoffState::Idle,
        }
    }

    pub fn payload(&self) -> Option<Payload> {
        self.payload
    }

    pub fn process_time(&self) -> SimTime {
        self.process_time
    }

    pub fn handoff_state(&self) -> HandoffState {
        self.handoff
    }

    pub fn is_handing_off(&self) -> bool {
        self.handoff != HandoffState::Idle
    }

    pub fn output(&self, port: &str) -> Option<ComponentId> {
        self.outputs.get(port)
    }

    /// Empty the slot without moving the payload anywhere (the owner has
    /// consumed it).
    ///
    /// # Panics
    ///
    /// Panics while a handoff is in flight.
    pub fn clear(&mut self) -> Option<Payload> {
        assert!(
            !self.is_handing_off(),
            "{}: cannot clear during a handoff",
            self.name
        );
        self.fresh = false;
        self.payload.take()
    }

    /// Get a signal that resolves with the next unobserved payload. The
    /// caller is attached as the signal's waiter.
    pub fn wait_for_load(&mut self, ctx: &mut Ctx<'_>, process: ProcessId) -> SignalId {
        let signal = ctx.sched.signal();
        match self.payload {
            Some(payload) if self.fresh => {
                self.fresh = false;
                ctx.sched.trigger(signal, Some(payload));
            }
            _ => {
                if let Some(stale) = self.load_waiter.replace(signal) {
                    ctx.sched.release(stale);
                }
            }
        }
        ctx.sched.wait(signal, process);
        signal
    }

    /// Begin moving the payload to the output wired at `port`. Returns a
    /// signal that fires with the payload once it has been handed on. With
    /// an empty slot the signal is already resolved (with no value).
    ///
    /// An unconnected port is treated as a full output.
    ///
    /// # Panics
    ///
    /// Panics if a handoff is already in flight.
    pub fn start_handoff(&mut self, ctx: &mut Ctx<'_>, port: &str) -> SignalId {
        assert!(
            !self.is_handing_off(),
            "{}: handoff already in flight",
            self.name
        );
        let done = ctx.sched.signal();
        if self.payload.is_none() {
            warn!(t = %ctx.now(), buffer = %self.name, "no payload to hand off");
            ctx.sched.trigger(done, None);
            return done;
        }
        let target = self.outputs.get(port);
        if target.is_none() {
            warn!(t = %ctx.now(), buffer = %self.name, port, "handoff toward unconnected port");
        }
        self.handoff = HandoffState::Polling { target, done };
        ctx.sched.schedule_now(ProcessId::Handoff(self.id));
        done
    }
}

impl FlowComponent for Buffer {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn coord(&self) -> Coord {
        self.coord
    }

    fn can_accept(&self, _payload: Payload) -> bool {
        self.payload.is_none()
    }

    fn accept(&mut self, ctx: &mut Ctx<'_>, payload: Payload) -> bool {
        if self.payload.is_some() {
            debug!(t = %ctx.now(), buffer = %self.name, %payload, "buffer occupied");
            return false;
        }
        self.payload = Some(payload);
        ctx.relocate(payload, self.id, self.coord);
        debug!(t = %ctx.now(), buffer = %self.name, %payload, "loaded");

        match self.load_waiter.take() {
            Some(signal) => {
                self.fresh = false;
                ctx.sched.trigger(signal, Some(payload));
            }
            None => self.fresh = true,
        }
        true
    }

    fn connect(&mut self, port: &str, to: ComponentId) -> Result<(), GraphError> {
        self.outputs.connect(&self.name, port, to)
    }

    fn outputs(&self) -> Vec<(String, ComponentId)> {
        self.outputs.iter().map(|(p, id)| (p.to_string(), id)).collect()
    }
}

/// Resume the handoff of the buffer owned by component `id`.
pub(crate) fn resume_handoff(engine: &mut Engine, id: ComponentId) {
    let poll = engine.config.poll_interval;
    let Some(buffer) = engine.graph.buffer(id) else {
        return;
    };
    let (state, process_time, payload) = (buffer.handoff, buffer.process_time, buffer.payload);
    let name = buffer.name.clone();

    match state {
        HandoffState::Idle => {}
        HandoffState::Polling { target, done } => {
            let Some(payload) = payload else {
                finish(engine, id, done, None);
                return;
            };
            let ready = target.is_some_and(|t| engine.can_accept(t, payload));
            let next = match (ready, target) {
                (true, Some(target)) => {
                    engine.scheduler.timeout(process_time, ProcessId::Handoff(id));
                    HandoffState::Processing { target, done }
                }
                _ => {
                    engine.scheduler.timeout(poll, ProcessId::Handoff(id));
                    state
                }
            };
            set_state(engine, id, next);
        }
        HandoffState::Processing { target, done } => {
            let Some(payload) = payload else {
                finish(engine, id, done, None);
                return;
            };
            if engine.accept(target, payload) {
                debug!(t = %engine.now(), buffer = %name, %payload, "handed off");
                finish(engine, id, done, Some(payload));
            } else {
                // Someone else filled the output during processing.
                engine.scheduler.timeout(poll, ProcessId::Handoff(id));
                set_state(
                    engine,
                    id,
                    HandoffState::Polling {
                        target: Some(target),
                        done,
                    },
                );
            }
        }
    }
}

fn set_state(engine: &mut Engine, id: ComponentId, state: HandoffState) {
    if let Some(buffer) = engine.graph.buffer_mut(id) {
        buffer.handoff = state;
    }
}

fn finish(engine: &mut Engine, id: ComponentId, done: SignalId, moved: Option<Payload>) {
    if let Some(buffer) = engine.graph.buffer_mut(id) {
        buffer.handoff = HandoffState::Idle;
        if moved.is_some() {
            buffer.payload = None;
            buffer.fresh = false;
        }
    }
    engine.scheduler.trigger(done, moved);
}
