//! Junction: ratio-based router over named output ports.
//!
//! Ports are visited in sorted name order. The cursor stays on a port until
//! it has received `ratio[index % ratio.len()]` payloads, then moves on. A
//! port marked unavailable is skipped (the per-port count resets). If no
//! port is available the junction retries after `retry_interval` with the
//! same payload.

use super::buffer::Buffer;
use super::{Ctx, FlowComponent};
use crate::engine::Engine;
use crate::fixed::SimTime;
use crate::graph::GraphError;
use crate::id::{ComponentId, SignalId};
use crate::sim::{ProcessId, Resume, ScheduledEvent};
use crate::unit::{Coord, Payload};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JunctionState {
    Idle,
    WaitForLoad { arrival: SignalId },
    /// No port was available; retrying after a delay.
    Retrying,
    HandingOff { done: SignalId },
}

/// Parse a `"2:1"` style ratio. Every weight must be positive.
pub fn parse_ratio(s: &str) -> Option<Vec<u32>> {
    let ratio = s
        .split(':')
        .map(|w| w.trim().parse::<u32>().ok().filter(|&w| w > 0))
        .collect::<Option<Vec<_>>>()?;
    (!ratio.is_empty()).then_some(ratio)
}

#[derive(Debug, Clone)]
pub struct Junction {
    id: ComponentId,
    name: String,
    coord: Coord,
    ratio: Vec<u32>,
    retry_interval: SimTime,
    buffer: Buffer,
    /// Availability per connected port, in visiting order.
    available: BTreeMap<String, bool>,
    port_index: usize,
    sent: u32,
    state: JunctionState,
}

impl Junction {
    pub fn new(
        id: ComponentId,
        name: impl Into<String>,
        coord: Coord,
        ratio: Vec<u32>,
        process_time: SimTime,
        retry_interval: SimTime,
    ) -> Result<Self, GraphError> {
        let name = name.into();
        if ratio.is_empty() || ratio.contains(&0) {
            return Err(GraphError::InvalidRatio { name, ratio });
        }
        let buffer = Buffer::new(id, format!("{name}_buf"), coord, process_time);
        Ok(Self {
            id,
            name,
            coord,
            ratio,
            retry_interval,
            buffer,
            available: BTreeMap::new(),
            port_index: 0,
            sent: 0,
            state: JunctionState::Idle,
        })
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    pub fn ratio(&self) -> &[u32] {
        &self.ratio
    }

    pub fn state(&self) -> JunctionState {
        self.state
    }

    /// Port the cursor currently points at.
    pub fn current_port(&self) -> Option<&str> {
        self.available.keys().nth(self.port_index).map(String::as_str)
    }

    pub fn is_port_available(&self, port: &str) -> bool {
        self.available.get(port).copied().unwrap_or(false)
    }

    pub fn set_port_available(&mut self, port: &str, available: bool) -> Result<(), GraphError> {
        match self.available.get_mut(port) {
            Some(flag) => {
                *flag = available;
                Ok(())
            }
            None => Err(GraphError::UnknownPort {
                component: self.name.clone(),
                port: port.to_string(),
            }),
        }
    }

    fn wait_for_load(&mut self, ctx: &mut Ctx<'_>) {
        let arrival = self.buffer.wait_for_load(ctx, ProcessId::Junction(self.id));
        self.state = JunctionState::WaitForLoad { arrival };
    }

    /// Pick the next available port from the cursor on, skipping (and
    /// resetting the count for) unavailable ones.
    fn choose_port(&mut self) -> Option<String> {
        let ports: Vec<(String, bool)> = self.available.iter().map(|(p, &a)| (p.clone(), a)).collect();
        if ports.is_empty() {
            return None;
        }
        for _ in 0..ports.len() {
            let (port, available) = &ports[self.port_index % ports.len()];
            if *available {
                return Some(port.clone());
            }
            self.port_index = (self.port_index + 1) % ports.len();
            self.sent = 0;
        }
        None
    }

    fn route(&mut self, ctx: &mut Ctx<'_>) {
        let process = ProcessId::Junction(self.id);
        match self.choose_port() {
            Some(port) => {
                debug!(t = %ctx.now(), junction = %self.name, port = %port, "routing");
                let done = self.buffer.start_handoff(ctx, &port);
                ctx.sched.wait(done, process);
                self.state = JunctionState::HandingOff { done };
            }
            None => {
                ctx.sched.timeout(self.retry_interval, process);
                self.state = JunctionState::Retrying;
            }
        }
    }

    fn handed_off(&mut self) {
        self.sent += 1;
        let weight = self.ratio[self.port_index % self.ratio.len()];
        if self.sent >= weight {
            self.sent = 0;
            self.port_index = (self.port_index + 1) % self.available.len().max(1);
        }
    }
}

impl FlowComponent for Junction {
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
        self.buffer.can_accept(payload)
    }

    fn accept(&mut self, ctx: &mut Ctx<'_>, payload: Payload) -> bool {
        self.buffer.accept(ctx, payload)
    }

    fn connect(&mut self, port: &str, to: ComponentId) -> Result<(), GraphError> {
        self.buffer.connect(port, to)?;
        self.available.insert(port.to_string(), true);
        Ok(())
    }

    fn outputs(&self) -> Vec<(String, ComponentId)> {
        self.buffer.outputs()
    }
}

pub(crate) fn start(engine: &mut Engine, id: ComponentId) {
    let (graph, mut ctx) = engine.split();
    if let Some(junction) = graph.junction_mut(id) {
        junction.wait_for_load(&mut ctx);
    }
}

pub(crate) fn resume(engine: &mut Engine, id: ComponentId, event: &ScheduledEvent) {
    let (graph, mut ctx) = engine.split();
    let Some(junction) = graph.junction_mut(id) else {
        return;
    };
    match (junction.state, event.resume) {
        (JunctionState::WaitForLoad { arrival }, Resume::Signal(sig)) if sig == arrival => {
            ctx.sched.release(arrival);
            junction.route(&mut ctx);
        }
        (JunctionState::Retrying, Resume::Timeout) => junction.route(&mut ctx),
        (JunctionState::HandingOff { done }, Resume::Signal(sig)) if sig == done => {
            ctx.sched.release(done);
            junction.handed_off();
            junction.wait_for_load(&mut ctx);
        }
        _ => {}
    }
}
