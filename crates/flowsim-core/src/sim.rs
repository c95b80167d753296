//! The discrete-event kernel: virtual clock, event queue and triggerable
//! signals.
//!
//! Every logical process in the model (a conveyor's shift loop, a buffer
//! handoff, a stock owner's order loop, ...) is an explicit state machine.
//! A process suspends by asking the [`Scheduler`] for a timeout or by
//! attaching itself as the waiter of a [`SignalId`]; the scheduler later
//! hands back a [`ScheduledEvent`] naming the [`ProcessId`] to resume and the
//! [`Resume`] cause. Dispatching that event to the right state machine is the
//! job of the owner of the model (see `factory::Factory`).
//!
//! Ordering: events resume in `(time, sequence)` order. `sequence` is
//! assigned at insertion, so events scheduled for the same instant resume in
//! the order they were scheduled. Waking a signal's waiter schedules it for
//! the current instant with a fresh sequence number.

use crate::fixed::SimTime;
use crate::id::{ComponentId, SignalId};
use crate::unit::Payload;
use slotmap::SlotMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

/// Names a suspended process. The component set is closed, so every loop in
/// the model has a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessId {
    /// A conveyor's periodic shift loop.
    ConveyorShift(ComponentId),
    /// The same-instant handoff of a conveyor's outfeed unit.
    ConveyorRelease(ComponentId),
    /// The handoff operation of a buffer (standalone or embedded).
    Handoff(ComponentId),
    /// A depalletizer's pallet cycle.
    Depalletizer(ComponentId),
    /// A batch builder's accumulate/release loop.
    BatchBuilder(ComponentId),
    /// A junction's routing loop.
    Junction(ComponentId),
    /// The warehouse loop merging orders onto pallets.
    WarehouseOrders,
    /// The warehouse loop taking returned pallets back into the pool.
    WarehouseReturns,
    /// An item warehouse infeed listener, by input lane index.
    ItemWarehouseInfeed(usize),
    /// The item warehouse's periodic order-matching sweep.
    ItemWarehouseSweep,
    /// An item warehouse picking loop, by output lane index.
    ItemWarehousePicking(usize),
    /// The inventory manager's periodic demand scan.
    DemandScan,
    /// A process owned by code outside the model (tests, pacing layers).
    External(u64),
}

/// Why a process is being resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// A timeout requested by the process elapsed.
    Timeout,
    /// A signal the process was waiting on was triggered.
    Signal(SignalId),
}

// ---------------------------------------------------------------------------
// Scheduled events
// ---------------------------------------------------------------------------

/// An entry in the event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub time: SimTime,
    pub sequence: u64,
    pub process: ProcessId,
    pub resume: Resume,
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap; reverse so the earliest (time, sequence) pops first.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// A one-shot event handle with at most one waiter.
#[derive(Debug, Clone, Default)]
struct Signal {
    triggered: bool,
    value: Option<Payload>,
    waiter: Option<ProcessId>,
}

// ---------------------------------------------------------------------------
// Run control
// ---------------------------------------------------------------------------

/// How far a run may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    /// Process every event with `time <= t`, then move the clock to `t`.
    Until(SimTime),
    /// Process events until the queue is empty.
    Idle,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The requested horizon was reached with events still pending.
    HorizonReached,
    /// The event queue drained. Normal termination, not a fault.
    Exhausted,
}

/// Errors surfaced by the public scheduling boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("negative delay {0}")]
    NegativeDelay(SimTime),
    #[error("horizon {horizon} lies before the current time {now}")]
    HorizonInPast { horizon: SimTime, now: SimTime },
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Virtual clock plus a min-heap of pending events keyed by `(time, sequence)`.
#[derive(Debug, Default)]
pub struct Scheduler {
    now: SimTime,
    heap: BinaryHeap<ScheduledEvent>,
    next_sequence: u64,
    signals: SlotMap<SignalId, Signal>,
    processed: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current virtual time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of events resumed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Number of events still queued.
    pub fn pending(&self) -> usize {
        self.heap.len()
    }

    /// Time of the earliest pending event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|e| e.time)
    }

    fn push(&mut self, time: SimTime, process: ProcessId, resume: Resume) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEvent {
            time,
            sequence,
            process,
            resume,
        });
        sequence
    }

    /// Schedule `process` to resume after `delay`. Returns the event's
    /// sequence number, which callers racing several wake-ups can keep to
    /// recognize the one they are still interested in.
    ///
    /// # Panics
    ///
    /// Panics on a negative delay. Delays from a validated `SimConfig` are
    /// never negative; use [`Scheduler::schedule_after`] at API boundaries.
    pub fn timeout(&mut self, delay: SimTime, process: ProcessId) -> u64 {
        assert!(delay >= SimTime::ZERO, "negative delay {delay} for {process:?}");
        let at = self.now.saturating_add(delay);
        self.push(at, process, Resume::Timeout)
    }

    /// Checked variant of [`Scheduler::timeout`].
    pub fn schedule_after(&mut self, delay: SimTime, process: ProcessId) -> Result<u64, ScheduleError> {
        if delay < SimTime::ZERO {
            return Err(ScheduleError::NegativeDelay(delay));
        }
        Ok(self.timeout(delay, process))
    }

    /// Resume `process` at the current instant, after everything already
    /// queued for this instant.
    pub fn schedule_now(&mut self, process: ProcessId) -> u64 {
        self.push(self.now, process, Resume::Timeout)
    }

    /// Create a fresh, untriggered signal.
    pub fn signal(&mut self) -> SignalId {
        self.signals.insert(Signal::default())
    }

    /// Whether a signal has been triggered. Released signals report `false`.
    pub fn is_triggered(&self, id: SignalId) -> bool {
        self.signals.get(id).is_some_and(|s| s.triggered)
    }

    /// The value a triggered signal was resolved with.
    pub fn value(&self, id: SignalId) -> Option<Payload> {
        self.signals.get(id).and_then(|s| s.value)
    }

    /// Trigger a signal, waking its waiter (if any) at the current instant.
    ///
    /// # Panics
    ///
    /// Panics if the signal was already triggered or has been released.
    pub fn trigger(&mut self, id: SignalId, value: Option<Payload>) {
        let signal = self
            .signals
            .get_mut(id)
            .unwrap_or_else(|| panic!("trigger on released signal {id:?}"));
        assert!(!signal.triggered, "signal {id:?} triggered twice");
        signal.triggered = true;
        signal.value = value;
        if let Some(waiter) = signal.waiter {
            self.push(self.now, waiter, Resume::Signal(id));
        }
    }

    /// Attach `process` as the waiter of a signal. If the signal already
    /// fired, the process is woken at the current instant.
    ///
    /// # Panics
    ///
    /// Panics if another process is already waiting on the signal.
    pub fn wait(&mut self, id: SignalId, process: ProcessId) {
        let signal = self
            .signals
            .get_mut(id)
            .unwrap_or_else(|| panic!("wait on released signal {id:?}"));
        if let Some(existing) = signal.waiter {
            assert_eq!(
                existing, process,
                "signal {id:?} already has waiter {existing:?}"
            );
            return;
        }
        signal.waiter = Some(process);
        if signal.triggered {
            self.push(self.now, process, Resume::Signal(id));
        }
    }

    /// Drop a signal handle. Its value is returned if it had been triggered.
    pub fn release(&mut self, id: SignalId) -> Option<Payload> {
        self.signals.remove(id).and_then(|s| s.value)
    }

    /// Number of live signal handles.
    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    /// Pop the next event if it is due within `horizon`, advancing the clock.
    pub fn next_due(&mut self, horizon: Horizon) -> Option<ScheduledEvent> {
        let due = match (self.heap.peek(), horizon) {
            (None, _) => false,
            (Some(_), Horizon::Idle) => true,
            (Some(next), Horizon::Until(limit)) => next.time <= limit,
        };
        if !due {
            return None;
        }
        let event = self.heap.pop()?;
        debug_assert!(event.time >= self.now, "time went backwards");
        self.now = event.time;
        self.processed += 1;
        Some(event)
    }

    /// Move the clock forward to `t` without resuming anything. Used after a
    /// bounded run so `now()` reports the horizon.
    ///
    /// # Panics
    ///
    /// Panics if an event earlier than `t` is still queued.
    pub fn advance_clock(&mut self, t: SimTime) {
        if let Some(next) = self.heap.peek() {
            assert!(next.time > t, "advancing clock past pending event at {}", next.time);
        }
        if t > self.now {
            self.now = t;
        }
    }

    /// Drive the queue with a dispatch closure. This is the kernel loop used
    /// when the processes are plain closures rather than model components.
    pub fn run<F>(&mut self, horizon: Horizon, mut dispatch: F) -> Result<RunOutcome, ScheduleError>
    where
        F: FnMut(&mut Scheduler, ScheduledEvent),
    {
        if let Horizon::Until(limit) = horizon
            && limit < self.now
        {
            return Err(ScheduleError::HorizonInPast {
                horizon: limit,
                now: self.now,
            });
        }
        while let Some(event) = self.next_due(horizon) {
            dispatch(self, event);
        }
        Ok(match horizon {
            Horizon::Idle => RunOutcome::Exhausted,
            Horizon::Until(limit) => {
                self.advance_clock(limit);
                if self.heap.is_empty() {
                    RunOutcome::Exhausted
                } else {
                    RunOutcome::HorizonReached
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::time;
    use crate::id::UnitId;

    fn ext(n: u64) -> ProcessId {
        ProcessId::External(n)
    }

    #[test]
    fn events_pop_in_time_order() {
        let mut s = Scheduler::new();
        s.timeout(time(3.0), ext(3));
        s.timeout(time(1.0), ext(1));
        s.timeout(time(2.0), ext(2));
        let mut order = Vec::new();
        let outcome = s
            .run(Horizon::Idle, |_, e| order.push(e.process))
            .unwrap();
        assert_eq!(outcome, RunOutcome::Exhausted);
        assert_eq!(order, vec![ext(1), ext(2), ext(3)]);
        assert_eq!(s.now(), time(3.0));
    }

    #[test]
    fn simultaneous_events_are_fifo() {
        let mut s = Scheduler::new();
        for n in 0..5 {
            s.timeout(time(1.0), ext(n));
        }
        let mut order = Vec::new();
        s.run(Horizon::Idle, |_, e| order.push(e.process)).unwrap();
        assert_eq!(order, (0..5).map(ext).collect::<Vec<_>>());
    }

    #[test]
    fn bounded_run_stops_at_horizon_and_moves_clock() {
        let mut s = Scheduler::new();
        s.timeout(time(1.0), ext(1));
        s.timeout(time(5.0), ext(5));
        let mut seen = Vec::new();
        let outcome = s
            .run(Horizon::Until(time(4.0)), |_, e| seen.push(e.process))
            .unwrap();
        assert_eq!(outcome, RunOutcome::HorizonReached);
        assert_eq!(seen, vec![ext(1)]);
        assert_eq!(s.now(), time(4.0));
    }

    #[test]
    fn horizon_is_inclusive() {
        let mut s = Scheduler::new();
        s.timeout(time(2.0), ext(2));
        let mut seen = 0;
        s.run(Horizon::Until(time(2.0)), |_, _| seen += 1).unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn periodic_process_reschedules_itself() {
        let mut s = Scheduler::new();
        s.timeout(time(1.0), ext(0));
        let mut ticks = Vec::new();
        s.run(Horizon::Until(time(3.5)), |s, e| {
            ticks.push(s.now());
            s.timeout(time(1.0), e.process);
        })
        .unwrap();
        assert_eq!(ticks, vec![time(1.0), time(2.0), time(3.0)]);
    }

    #[test]
    fn negative_delay_rejected_at_boundary() {
        let mut s = Scheduler::new();
        assert_eq!(
            s.schedule_after(time(-1.0), ext(0)),
            Err(ScheduleError::NegativeDelay(time(-1.0)))
        );
        assert_eq!(s.pending(), 0);
    }

    #[test]
    #[should_panic(expected = "negative delay")]
    fn negative_timeout_panics() {
        let mut s = Scheduler::new();
        s.timeout(time(-0.5), ext(0));
    }

    #[test]
    fn horizon_in_past_is_rejected() {
        let mut s = Scheduler::new();
        s.timeout(time(2.0), ext(0));
        s.run(Horizon::Idle, |_, _| {}).unwrap();
        let err = s.run(Horizon::Until(time(1.0)), |_, _| {}).unwrap_err();
        assert!(matches!(err, ScheduleError::HorizonInPast { .. }));
    }

    #[test]
    fn trigger_wakes_waiter_at_current_time() {
        let mut s = Scheduler::new();
        let sig = s.signal();
        s.wait(sig, ext(7));
        s.timeout(time(2.0), ext(1));
        let mut wakes = Vec::new();
        s.run(Horizon::Idle, |s, e| {
            if e.process == ext(1) {
                s.trigger(sig, Some(Payload::Unit(UnitId(42))));
            } else {
                wakes.push((s.now(), e.resume));
            }
        })
        .unwrap();
        assert_eq!(wakes, vec![(time(2.0), Resume::Signal(sig))]);
        assert_eq!(s.value(sig), Some(Payload::Unit(UnitId(42))));
    }

    #[test]
    fn wake_is_queued_behind_same_instant_events() {
        let mut s = Scheduler::new();
        let sig = s.signal();
        s.wait(sig, ext(9));
        s.timeout(time(1.0), ext(1));
        s.timeout(time(1.0), ext(2));
        let mut order = Vec::new();
        s.run(Horizon::Idle, |s, e| {
            order.push(e.process);
            if e.process == ext(1) {
                s.trigger(sig, None);
            }
        })
        .unwrap();
        assert_eq!(order, vec![ext(1), ext(2), ext(9)]);
    }

    #[test]
    fn waiting_on_triggered_signal_resumes_immediately() {
        let mut s = Scheduler::new();
        let sig = s.signal();
        s.trigger(sig, None);
        assert_eq!(s.pending(), 0);
        s.wait(sig, ext(3));
        assert_eq!(s.pending(), 1);
    }

    #[test]
    #[should_panic(expected = "triggered twice")]
    fn retrigger_panics() {
        let mut s = Scheduler::new();
        let sig = s.signal();
        s.trigger(sig, None);
        s.trigger(sig, None);
    }

    #[test]
    #[should_panic(expected = "already has waiter")]
    fn second_waiter_panics() {
        let mut s = Scheduler::new();
        let sig = s.signal();
        s.wait(sig, ext(1));
        s.wait(sig, ext(2));
    }

    #[test]
    fn race_loser_stays_orphaned() {
        // A process races a signal against a timeout; the signal wins and
        // the timeout still fires later, which the process must ignore.
        let mut s = Scheduler::new();
        let sig = s.signal();
        s.wait(sig, ext(1));
        let watchdog = s.timeout(time(10.0), ext(1));
        s.timeout(time(2.0), ext(2));
        let mut accepted = Vec::new();
        let mut pending_watchdog = Some(watchdog);
        s.run(Horizon::Idle, |s, e| match (e.process, e.resume) {
            (p, _) if p == ext(2) => s.trigger(sig, None),
            (_, Resume::Signal(_)) => {
                pending_watchdog = None;
                accepted.push(s.now());
            }
            (_, Resume::Timeout) => {
                if pending_watchdog == Some(e.sequence) {
                    accepted.push(s.now());
                }
            }
        })
        .unwrap();
        assert_eq!(accepted, vec![time(2.0)]);
        assert_eq!(s.now(), time(10.0));
    }

    #[test]
    fn release_drops_signal() {
        let mut s = Scheduler::new();
        let sig = s.signal();
        s.trigger(sig, Some(Payload::Unit(UnitId(1))));
        assert_eq!(s.release(sig), Some(Payload::Unit(UnitId(1))));
        assert_eq!(s.signal_count(), 0);
        assert!(!s.is_triggered(sig));
    }
}
