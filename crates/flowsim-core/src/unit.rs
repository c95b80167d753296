//! Transport units: the pallets and item batches components hand to one
//! another.

use crate::id::{ComponentId, ItemId, OrderId, SignalId, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Integer grid position of a component or conveyor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to `other`.
    pub fn manhattan(self, other: Coord) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl From<(i32, i32)> for Coord {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Where a unit physically is. `component` is `None` while the unit sits in
/// a stock owner's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub component: Option<ComponentId>,
    pub coord: Coord,
}

/// Logical destination requested for a pallet carrying an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Depalletizer,
    ItemWarehouse,
    Warehouse,
}

/// A pallet moving through the system. Carries at most one order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemPallet {
    order: Option<OrderId>,
    destination: Option<Destination>,
}

impl SystemPallet {
    pub fn order(&self) -> Option<OrderId> {
        self.order
    }

    pub fn destination(&self) -> Option<Destination> {
        self.destination
    }

    /// Put an order on the pallet and request a destination for it.
    ///
    /// # Panics
    ///
    /// Panics if the pallet already carries an order.
    pub fn merge_order(&mut self, order: OrderId, destination: Destination) {
        assert!(
            self.order.is_none(),
            "pallet already carries {:?}, cannot merge {order}",
            self.order
        );
        self.order = Some(order);
        self.destination = Some(destination);
    }

    /// Drop the order and its destination request.
    pub fn clear_order(&mut self) -> Option<OrderId> {
        self.destination = None;
        self.order.take()
    }
}

/// Lifecycle of an item batch as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchState {
    InProgress,
    Ready,
}

/// Items accumulated on a batch builder.
///
/// `ready` fires once when the batch reaches the item cap or when someone
/// forces an early release. Items are rejected afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemBatch {
    items: BTreeMap<ItemId, u32>,
    item_count: u32,
    ready: SignalId,
}

impl ItemBatch {
    pub fn new(ready: SignalId) -> Self {
        Self {
            items: BTreeMap::new(),
            item_count: 0,
            ready,
        }
    }

    pub fn items(&self) -> &BTreeMap<ItemId, u32> {
        &self.items
    }

    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    pub fn ready_signal(&self) -> SignalId {
        self.ready
    }

    /// Count of one item in the batch.
    pub fn quantity(&self, item: ItemId) -> u32 {
        self.items.get(&item).copied().unwrap_or(0)
    }

    /// Add one item; returns the new total.
    pub fn add_item(&mut self, item: ItemId) -> u32 {
        *self.items.entry(item).or_insert(0) += 1;
        self.item_count += 1;
        self.item_count
    }
}

/// What kind of unit a [`TransportUnit`] is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    Pallet(SystemPallet),
    Batch(ItemBatch),
}

/// A pallet or batch with its identity and current location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportUnit {
    pub id: UnitId,
    pub location: Location,
    pub kind: UnitKind,
}

impl TransportUnit {
    pub fn pallet(id: UnitId, location: Location) -> Self {
        Self {
            id,
            location,
            kind: UnitKind::Pallet(SystemPallet::default()),
        }
    }

    pub fn batch(id: UnitId, location: Location, ready: SignalId) -> Self {
        Self {
            id,
            location,
            kind: UnitKind::Batch(ItemBatch::new(ready)),
        }
    }

    pub fn as_pallet(&self) -> Option<&SystemPallet> {
        match &self.kind {
            UnitKind::Pallet(p) => Some(p),
            UnitKind::Batch(_) => None,
        }
    }

    pub fn as_pallet_mut(&mut self) -> Option<&mut SystemPallet> {
        match &mut self.kind {
            UnitKind::Pallet(p) => Some(p),
            UnitKind::Batch(_) => None,
        }
    }

    pub fn as_batch(&self) -> Option<&ItemBatch> {
        match &self.kind {
            UnitKind::Batch(b) => Some(b),
            UnitKind::Pallet(_) => None,
        }
    }

    pub fn as_batch_mut(&mut self) -> Option<&mut ItemBatch> {
        match &mut self.kind {
            UnitKind::Batch(b) => Some(b),
            UnitKind::Pallet(_) => None,
        }
    }

    /// Move the unit, optionally into a different component.
    pub fn relocate(&mut self, component: ComponentId, coord: Coord) {
        self.location = Location {
            component: Some(component),
            coord,
        };
    }
}

impl fmt::Display for TransportUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            UnitKind::Pallet(_) => write!(f, "SystemPallet({})", self.id.0),
            UnitKind::Batch(_) => write!(f, "ItemBatch({})", self.id.0),
        }
    }
}

/// Anything a flow component can hold or pass on: a whole transport unit or
/// a single loose item coming off a depalletizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Payload {
    Unit(UnitId),
    Item(ItemId),
}

impl Payload {
    pub fn unit(self) -> Option<UnitId> {
        match self {
            Payload::Unit(id) => Some(id),
            Payload::Item(_) => None,
        }
    }

    pub fn item(self) -> Option<ItemId> {
        match self {
            Payload::Item(id) => Some(id),
            Payload::Unit(_) => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Unit(id) => id.fmt(f),
            Payload::Item(id) => id.fmt(f),
        }
    }
}

/// All live transport units of a run, keyed by id.
pub type UnitStore = BTreeMap<UnitId, TransportUnit>;

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn signal() -> SignalId {
        let mut map: SlotMap<SignalId, ()> = SlotMap::with_key();
        map.insert(())
    }

    #[test]
    fn merge_and_clear_order() {
        let mut pallet = SystemPallet::default();
        pallet.merge_order(OrderId(500_001), Destination::Depalletizer);
        assert_eq!(pallet.order(), Some(OrderId(500_001)));
        assert_eq!(pallet.destination(), Some(Destination::Depalletizer));
        assert_eq!(pallet.clear_order(), Some(OrderId(500_001)));
        assert_eq!(pallet.order(), None);
        assert_eq!(pallet.destination(), None);
    }

    #[test]
    #[should_panic(expected = "already carries")]
    fn second_order_on_pallet_panics() {
        let mut pallet = SystemPallet::default();
        pallet.merge_order(OrderId(1), Destination::Depalletizer);
        pallet.merge_order(OrderId(2), Destination::Depalletizer);
    }

    #[test]
    fn batch_counts_items() {
        let mut batch = ItemBatch::new(signal());
        batch.add_item(ItemId(3));
        batch.add_item(ItemId(3));
        assert_eq!(batch.add_item(ItemId(7)), 3);
        assert_eq!(batch.quantity(ItemId(3)), 2);
        assert_eq!(batch.quantity(ItemId(9)), 0);
        assert_eq!(batch.items().len(), 2);
    }

    #[test]
    fn unit_kind_accessors() {
        let mut unit = TransportUnit::pallet(UnitId(10_000_001), Location::default());
        assert!(unit.as_pallet().is_some());
        assert!(unit.as_batch_mut().is_none());
        assert_eq!(unit.to_string(), "SystemPallet(10000001)");
    }

    #[test]
    fn manhattan_distance() {
        assert_eq!(Coord::new(0, 0).manhattan(Coord::new(0, 4)), 4);
        assert_eq!(Coord::new(-2, 1).manhattan(Coord::new(1, 1)), 3);
    }
}
