//! Outbound notifications with pre-allocated ring buffers.
//!
//! Model code publishes [`Event`]s while the kernel resumes a process. The
//! factory delivers everything buffered once the step finishes. Each event
//! kind has its own [`EventBuffer`] ring buffer with a configurable capacity.
//! A step that publishes more events of one kind than that capacity loses the
//! oldest ones; [`EventBus::dropped_count`] tells how many, and the first
//! loss per kind is logged.
//!
//! Delivery preserves global publication order across kinds, so an
//! `update_order` published before a `move_payload` reaches observers first.
//!
//! # Subscribers
//!
//! Only passive listeners exist: observers read events and cannot feed
//! anything back into the model. Publishing is fire-and-forget; a kind with
//! no subscriber costs a buffer slot and nothing else.
//!
//! # Suppression
//!
//! Event kinds can be suppressed via [`EventBus::suppress`], which prevents
//! any allocation or recording for that kind.

use crate::fixed::SimTime;
use crate::id::{ComponentId, OrderId, UnitId};
use crate::order::OrderStatus;
use crate::unit::{BatchState, Coord};
use tracing::warn;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A notification. All events carry the simulation time they were published at.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A batch builder started a new batch.
    CreateBatch { id: UnitId, time: SimTime },
    /// A batch changed state (it is handed on once ready).
    UpdatePayload {
        id: UnitId,
        state: BatchState,
        time: SimTime,
    },
    /// The item warehouse took a batch into stock.
    StorePayload { id: UnitId, time: SimTime },
    /// A unit moved to new coordinates.
    MovePayload {
        id: UnitId,
        coords: Coord,
        time: SimTime,
    },
    /// The warehouse released a pallet carrying an order.
    DispatchPallet { id: UnitId, time: SimTime },
    /// An order changed status. `completion_time` is set for `Completed`.
    UpdateOrder {
        order_id: OrderId,
        status: OrderStatus,
        completion_time: Option<SimTime>,
        time: SimTime,
    },
    /// Item warehouse stock level; `fill` is a percentage of capacity.
    ItemWarehouseItemCount { count: u64, fill: u32, time: SimTime },
    /// Empty pallets in the warehouse pool; `fill` is a percentage of capacity.
    WarehousePalletCount { count: u64, fill: u32, time: SimTime },
    /// Orders waiting in the warehouse queue.
    WarehouseOrderCount { count: u64, time: SimTime },
    /// Orders waiting in the item warehouse backlog.
    ItemWarehouseOrderCount { count: u64, time: SimTime },
    /// A batch builder opened a batch and is accumulating items.
    BatchBuilderBuilding { id: ComponentId, time: SimTime },
    /// A batch builder handed its batch on and is empty again.
    BatchBuilderIdle { id: ComponentId, time: SimTime },
}

/// Discriminant tag for event types, used for subscription and suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CreateBatch,
    UpdatePayload,
    StorePayload,
    MovePayload,
    DispatchPallet,
    UpdateOrder,
    ItemWarehouseItemCount,
    WarehousePalletCount,
    WarehouseOrderCount,
    ItemWarehouseOrderCount,
    BatchBuilderBuilding,
    BatchBuilderIdle,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 12;

impl Event {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::CreateBatch { .. } => EventKind::CreateBatch,
            Event::UpdatePayload { .. } => EventKind::UpdatePayload,
            Event::StorePayload { .. } => EventKind::StorePayload,
            Event::MovePayload { .. } => EventKind::MovePayload,
            Event::DispatchPallet { .. } => EventKind::DispatchPallet,
            Event::UpdateOrder { .. } => EventKind::UpdateOrder,
            Event::ItemWarehouseItemCount { .. } => EventKind::ItemWarehouseItemCount,
            Event::WarehousePalletCount { .. } => EventKind::WarehousePalletCount,
            Event::WarehouseOrderCount { .. } => EventKind::WarehouseOrderCount,
            Event::ItemWarehouseOrderCount { .. } => EventKind::ItemWarehouseOrderCount,
            Event::BatchBuilderBuilding { .. } => EventKind::BatchBuilderBuilding,
            Event::BatchBuilderIdle { .. } => EventKind::BatchBuilderIdle,
        }
    }

    /// The topic name observers know this event by.
    pub fn topic(&self) -> &'static str {
        self.kind().topic()
    }

    /// Simulation time of publication.
    pub fn time(&self) -> SimTime {
        match *self {
            Event::CreateBatch { time, .. }
            | Event::UpdatePayload { time, .. }
            | Event::StorePayload { time, .. }
            | Event::MovePayload { time, .. }
            | Event::DispatchPallet { time, .. }
            | Event::UpdateOrder { time, .. }
            | Event::ItemWarehouseItemCount { time, .. }
            | Event::WarehousePalletCount { time, .. }
            | Event::WarehouseOrderCount { time, .. }
            | Event::ItemWarehouseOrderCount { time, .. }
            | Event::BatchBuilderBuilding { time, .. }
            | Event::BatchBuilderIdle { time, .. } => time,
        }
    }
}

impl EventKind {
    pub const ALL: [EventKind; EVENT_KIND_COUNT] = [
        EventKind::CreateBatch,
        EventKind::UpdatePayload,
        EventKind::StorePayload,
        EventKind::MovePayload,
        EventKind::DispatchPallet,
        EventKind::UpdateOrder,
        EventKind::ItemWarehouseItemCount,
        EventKind::WarehousePalletCount,
        EventKind::WarehouseOrderCount,
        EventKind::ItemWarehouseOrderCount,
        EventKind::BatchBuilderBuilding,
        EventKind::BatchBuilderIdle,
    ];

    /// Convert to usize index for array lookups.
    fn index(self) -> usize {
        self as usize
    }

    pub fn topic(self) -> &'static str {
        match self {
            EventKind::CreateBatch => "create_batch",
            EventKind::UpdatePayload => "update_payload",
            EventKind::StorePayload => "store_payload",
            EventKind::MovePayload => "move_payload",
            EventKind::DispatchPallet => "dispatch_pallet",
            EventKind::UpdateOrder => "update_order",
            EventKind::ItemWarehouseItemCount => "item_warehouse_item_count",
            EventKind::WarehousePalletCount => "warehouse_pallet_count",
            EventKind::WarehouseOrderCount => "warehouse_order_count",
            EventKind::ItemWarehouseOrderCount => "item_warehouse_order_count",
            EventKind::BatchBuilderBuilding => "batch_builder_building",
            EventKind::BatchBuilderIdle => "batch_builder_idle",
        }
    }

    /// Look a kind up by topic name.
    pub fn from_topic(topic: &str) -> Option<EventKind> {
        Self::ALL.into_iter().find(|k| k.topic() == topic)
    }
}

/// Fill level as a whole percentage, rounded up so any content shows as at
/// least 1%.
pub fn fill_percent(count: u64, capacity: u64) -> u32 {
    if capacity == 0 {
        return 0;
    }
    let pct = (count.saturating_mul(100)).div_ceil(capacity);
    u32::try_from(pct).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// EventBuffer: pre-allocated ring buffer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Stamped {
    seq: u64,
    event: Event,
}

/// A pre-allocated ring buffer for events. Fixed capacity; when full, the
/// oldest events are dropped.
#[derive(Debug)]
pub struct EventBuffer {
    /// Pre-allocated storage.
    events: Vec<Option<Stamped>>,
    /// Write position (wraps around).
    head: usize,
    /// Number of events currently stored (may be less than capacity).
    len: usize,
    /// Total events ever written (including dropped).
    total_written: u64,
    /// Events overwritten before they were read.
    dropped: u64,
}

impl EventBuffer {
    /// Create a new ring buffer with the given capacity.
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
            dropped: 0,
        }
    }

    /// Returns `true` when the write overwrote an unread event.
    fn push(&mut self, seq: u64, event: Event) -> bool {
        let overwrote = self.len == self.capacity();
        if overwrote {
            self.dropped += 1;
        }
        self.events[self.head] = Some(Stamped { seq, event });
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        self.total_written += 1;
        overwrote
    }

    /// The total capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    /// Number of events currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total events written since creation (including dropped).
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Number of events that were dropped because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    fn stamped(&self) -> impl Iterator<Item = &Stamped> {
        // head points to the next write position, which is the oldest entry once full.
        let start = if self.len < self.capacity() { 0 } else { self.head };
        (0..self.len).filter_map(move |i| self.events[(start + i) % self.capacity()].as_ref())
    }

    /// Iterate over events from oldest to newest.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Event> {
        self.stamped().map(|s| &s.event).collect::<Vec<_>>().into_iter()
    }

    /// Clear all events from the buffer.
    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&Event)>;

/// Priority level for event subscribers. Lower priorities run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriberPriority {
    Pre = 0,
    Normal = 1,
    Post = 2,
}

/// Optional predicate that filters events for a subscriber.
pub type EventFilter = Box<dyn Fn(&Event) -> bool>;

struct SubscriberEntry {
    listener: PassiveListener,
    priority: SubscriberPriority,
    filter: Option<EventFilter>,
    insertion_order: u64,
}

impl std::fmt::Debug for SubscriberEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberEntry")
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .field("insertion_order", &self.insertion_order)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Holds one ring buffer per event kind, subscriber lists, and suppression
/// flags.
pub struct EventBus {
    buffers: [Option<EventBuffer>; EVENT_KIND_COUNT],
    suppressed: [bool; EVENT_KIND_COUNT],
    subscribers: [Vec<SubscriberEntry>; EVENT_KIND_COUNT],
    default_capacity: usize,
    next_insertion_order: u64,
    next_seq: u64,
    delivered: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("buffers", &self.buffers)
            .field("suppressed", &self.suppressed)
            .field("default_capacity", &self.default_capacity)
            .field("delivered", &self.delivered)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a new event bus with the given default buffer capacity per kind.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            buffers: Default::default(),
            suppressed: [false; EVENT_KIND_COUNT],
            subscribers: Default::default(),
            default_capacity,
            next_insertion_order: 0,
            next_seq: 0,
            delivered: 0,
        }
    }

    /// Suppress an event kind. Suppressed events are never allocated or buffered.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.buffers[kind.index()] = None;
    }

    /// Lift a suppression.
    pub fn unsuppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = false;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Publish an event. No-ops if the kind is suppressed.
    pub fn publish(&mut self, event: Event) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let capacity = self.default_capacity;
        let kind = event.kind();
        let buffer = self.buffers[idx].get_or_insert_with(|| EventBuffer::new(capacity));
        if buffer.push(seq, event) && buffer.dropped_count() == 1 {
            warn!(topic = kind.topic(), capacity, "event buffer full, dropping oldest events");
        }
    }

    /// Register a passive listener with Normal priority and no filter.
    pub fn subscribe(&mut self, kind: EventKind, listener: PassiveListener) {
        self.subscribe_filtered(kind, SubscriberPriority::Normal, None, listener);
    }

    /// Register a passive listener with explicit priority and optional filter.
    pub fn subscribe_filtered(
        &mut self,
        kind: EventKind,
        priority: SubscriberPriority,
        filter: Option<EventFilter>,
        listener: PassiveListener,
    ) {
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        let list = &mut self.subscribers[kind.index()];
        list.push(SubscriberEntry {
            listener,
            priority,
            filter,
            insertion_order: order,
        });
        list.sort_by_key(|entry| (entry.priority, entry.insertion_order));
    }

    /// Number of listeners registered for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers[kind.index()].len()
    }

    /// Deliver all buffered events to subscribers in publication order, then
    /// clear the buffers.
    ///
    /// Within one event, subscribers run by `(priority, registration order)`;
    /// a subscriber whose filter rejects the event is skipped.
    pub fn deliver(&mut self) {
        let mut pending: Vec<Stamped> = Vec::new();
        for buffer in self.buffers.iter_mut().flatten() {
            if buffer.is_empty() {
                continue;
            }
            pending.extend(buffer.stamped().cloned());
            buffer.clear();
        }
        if pending.is_empty() {
            return;
        }
        pending.sort_by_key(|s| s.seq);

        for Stamped { event, .. } in &pending {
            for entry in &mut self.subscribers[event.kind().index()] {
                if let Some(ref filter) = entry.filter
                    && !filter(event)
                {
                    continue;
                }
                (entry.listener)(event);
            }
        }
        self.delivered += pending.len() as u64;
    }

    /// The event buffer of a kind (read-only).
    pub fn buffer(&self, kind: EventKind) -> Option<&EventBuffer> {
        self.buffers[kind.index()].as_ref()
    }

    /// Count of events currently buffered for a kind.
    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.buffers[kind.index()].as_ref().map_or(0, |b| b.len())
    }

    /// Total events ever published for a kind (including dropped).
    pub fn total_published(&self, kind: EventKind) -> u64 {
        self.buffers[kind.index()]
            .as_ref()
            .map_or(0, |b| b.total_written())
    }

    /// Events of a kind lost to a full buffer before delivery.
    pub fn dropped_count(&self, kind: EventKind) -> u64 {
        self.buffers[kind.index()].as_ref().map_or(0, |b| b.dropped_count())
    }

    /// Events handed to subscribers so far.
    pub fn delivered_count(&self) -> u64 {
        self.delivered
    }

    /// Clear all buffers. Does not remove subscribers or suppression settings.
    pub fn clear_all(&mut self) {
        for b in self.buffers.iter_mut().flatten() {
            b.clear();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::time;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn moved(id: u64, t: f64) -> Event {
        Event::MovePayload {
            id: UnitId(id),
            coords: Coord::new(0, 0),
            time: time(t),
        }
    }

    #[test]
    fn ring_wraps_and_drops_oldest() {
        let mut buf = EventBuffer::new(3);
        for i in 0..5 {
            buf.push(i, moved(i, i as f64));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.total_written(), 5);
        assert_eq!(buf.dropped_count(), 2);
        let ids: Vec<u64> = buf
            .iter()
            .map(|e| match e {
                Event::MovePayload { id, .. } => id.0,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn dropped_count_survives_clear() {
        let mut bus = EventBus::new(2);
        for i in 0..5 {
            bus.publish(moved(i, 0.0));
        }
        bus.deliver();
        assert_eq!(bus.dropped_count(EventKind::MovePayload), 3);

        // Within capacity: nothing more is lost.
        bus.publish(moved(5, 1.0));
        bus.publish(moved(6, 1.0));
        bus.deliver();
        assert_eq!(bus.dropped_count(EventKind::MovePayload), 3);
        assert_eq!(bus.total_published(EventKind::MovePayload), 7);
    }

    #[test]
    fn zero_capacity_clamped() {
        let buf = EventBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
    }

    #[test]
    fn suppressed_kind_is_never_buffered() {
        let mut bus = EventBus::new(16);
        bus.suppress(EventKind::MovePayload);
        bus.publish(moved(1, 0.0));
        assert!(bus.is_suppressed(EventKind::MovePayload));
        assert_eq!(bus.total_published(EventKind::MovePayload), 0);
        assert!(bus.buffer(EventKind::MovePayload).is_none());
    }

    #[test]
    fn delivery_follows_publication_order_across_kinds() {
        let mut bus = EventBus::new(16);
        let seen = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::MovePayload, EventKind::UpdateOrder] {
            let seen = seen.clone();
            bus.subscribe(kind, Box::new(move |e| seen.borrow_mut().push(e.topic())));
        }
        bus.publish(Event::UpdateOrder {
            order_id: OrderId(1),
            status: OrderStatus::Completed,
            completion_time: Some(time(3.0)),
            time: time(3.0),
        });
        bus.publish(moved(7, 3.0));
        bus.deliver();
        assert_eq!(*seen.borrow(), vec!["update_order", "move_payload"]);
        assert_eq!(bus.buffered_count(EventKind::UpdateOrder), 0);
        assert_eq!(bus.delivered_count(), 2);
    }

    #[test]
    fn priorities_then_registration_order() {
        let mut bus = EventBus::new(4);
        let order = Rc::new(RefCell::new(Vec::new()));
        for (tag, prio) in [
            ('N', SubscriberPriority::Normal),
            ('P', SubscriberPriority::Post),
            ('A', SubscriberPriority::Pre),
            ('M', SubscriberPriority::Normal),
        ] {
            let order = order.clone();
            bus.subscribe_filtered(
                EventKind::MovePayload,
                prio,
                None,
                Box::new(move |_| order.borrow_mut().push(tag)),
            );
        }
        bus.publish(moved(1, 0.0));
        bus.deliver();
        assert_eq!(*order.borrow(), vec!['A', 'N', 'M', 'P']);
    }

    #[test]
    fn filter_blocks_non_matching() {
        let mut bus = EventBus::new(8);
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        bus.subscribe_filtered(
            EventKind::MovePayload,
            SubscriberPriority::Normal,
            Some(Box::new(|e| matches!(e, Event::MovePayload { id, .. } if id.0 == 2))),
            Box::new(move |_| *h.borrow_mut() += 1),
        );
        bus.publish(moved(1, 0.0));
        bus.publish(moved(2, 0.0));
        bus.deliver();
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let mut bus = EventBus::default();
        bus.publish(moved(1, 0.0));
        bus.deliver();
        assert_eq!(bus.buffered_count(EventKind::MovePayload), 0);
    }

    #[test]
    fn topics_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_topic(kind.topic()), Some(kind));
        }
        assert_eq!(EventKind::from_topic("nope"), None);
    }

    #[test]
    fn fill_rounds_up() {
        assert_eq!(fill_percent(0, 25), 0);
        assert_eq!(fill_percent(1, 500), 1);
        assert_eq!(fill_percent(25, 25), 100);
        assert_eq!(fill_percent(3, 0), 0);
    }
}
