//! Orders and the book that keeps every order of a run.

use crate::fixed::SimTime;
use crate::id::{ItemId, OrderId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Processing state of an order. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    /// Pending may jump straight to Completed (forced handoff).
    pub fn can_become(self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::Pending, OrderStatus::InProgress) => true,
            (OrderStatus::Pending | OrderStatus::InProgress, OrderStatus::Completed) => true,
            (OrderStatus::Pending | OrderStatus::InProgress, OrderStatus::Cancelled) => true,
            _ => false,
        }
    }
}

/// What an order asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Move `qty` units of one item from the warehouse to the item warehouse.
    Refill { item: ItemId, qty: u32 },
    /// Take a mix of items out of the item warehouse.
    Opm { items: BTreeMap<ItemId, u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub created_at: SimTime,
    pub kind: OrderKind,
    status: OrderStatus,
    completed_at: Option<SimTime>,
}

impl Order {
    pub fn refill(id: OrderId, item: ItemId, qty: u32, created_at: SimTime) -> Self {
        Self::new(id, OrderKind::Refill { item, qty }, created_at)
    }

    pub fn opm(id: OrderId, items: BTreeMap<ItemId, u32>, created_at: SimTime) -> Self {
        Self::new(id, OrderKind::Opm { items }, created_at)
    }

    fn new(id: OrderId, kind: OrderKind, created_at: SimTime) -> Self {
        Self {
            id,
            created_at,
            kind,
            status: OrderStatus::Pending,
            completed_at: None,
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Time the order reached `Completed`.
    pub fn completed_at(&self) -> Option<SimTime> {
        self.completed_at
    }

    /// Every item line of the order with its quantity.
    pub fn lines(&self) -> Vec<(ItemId, u32)> {
        match &self.kind {
            OrderKind::Refill { item, qty } => vec![(*item, *qty)],
            OrderKind::Opm { items } => items.iter().map(|(&i, &q)| (i, q)).collect(),
        }
    }

    /// Total units requested.
    pub fn total_quantity(&self) -> u64 {
        self.lines().iter().map(|&(_, q)| u64::from(q)).sum()
    }

    /// Move the order forward.
    ///
    /// # Panics
    ///
    /// Panics on a backward or repeated transition.
    pub fn set_status(&mut self, next: OrderStatus, now: SimTime) {
        assert!(
            self.status.can_become(next),
            "{} cannot move from {:?} to {next:?}",
            self.id,
            self.status
        );
        self.status = next;
        if next == OrderStatus::Completed {
            self.completed_at = Some(now);
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            OrderKind::Refill { .. } => "RefillOrder",
            OrderKind::Opm { .. } => "OpmOrder",
        };
        write!(f, "{kind}(id={}, status={:?})", self.id.0, self.status)
    }
}

/// An order rejected at placement time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order references unknown item {0}")]
    UnknownItem(ItemId),
    #[error("order requests nothing")]
    Empty,
    #[error("item {0} does not fit on a pallet")]
    DoesNotFitPallet(ItemId),
    #[error("{qty} x {item} exceeds one pallet ({max})")]
    ExceedsPallet { item: ItemId, qty: u32, max: u32 },
    #[error("no {0} is configured")]
    NoStockOwner(&'static str),
    #[error("order {0} is not a {1} order")]
    WrongKind(OrderId, &'static str),
}

/// Every order placed during a run, keyed by id. Orders are never removed,
/// so status and completion time stay readable after the fact.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    orders: BTreeMap<OrderId, Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if an order with the same id is already present.
    pub fn insert(&mut self, order: Order) -> OrderId {
        let id = order.id;
        let previous = self.orders.insert(id, order);
        assert!(previous.is_none(), "{id} placed twice");
        id
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn get_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Orders currently in `status`.
    pub fn with_status(&self, status: OrderStatus) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(move |o| o.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::time;

    #[test]
    fn forward_transitions() {
        let mut order = Order::refill(OrderId(500_001), ItemId(1), 10, SimTime::ZERO);
        assert_eq!(order.status(), OrderStatus::Pending);
        order.set_status(OrderStatus::InProgress, time(1.0));
        order.set_status(OrderStatus::Completed, time(4.0));
        assert_eq!(order.completed_at(), Some(time(4.0)));
    }

    #[test]
    fn pending_may_complete_directly() {
        let mut order = Order::refill(OrderId(1), ItemId(1), 1, SimTime::ZERO);
        order.set_status(OrderStatus::Completed, time(2.0));
        assert!(order.status().is_terminal());
    }

    #[test]
    #[should_panic(expected = "cannot move")]
    fn backward_transition_panics() {
        let mut order = Order::refill(OrderId(1), ItemId(1), 1, SimTime::ZERO);
        order.set_status(OrderStatus::Completed, time(1.0));
        order.set_status(OrderStatus::InProgress, time(2.0));
    }

    #[test]
    fn opm_lines_sorted_by_item() {
        let items = BTreeMap::from([(ItemId(9), 2), (ItemId(3), 5)]);
        let order = Order::opm(OrderId(2), items, SimTime::ZERO);
        assert_eq!(order.lines(), vec![(ItemId(3), 5), (ItemId(9), 2)]);
        assert_eq!(order.total_quantity(), 7);
    }

    #[test]
    fn book_filters_by_status() {
        let mut book = OrderBook::new();
        book.insert(Order::refill(OrderId(1), ItemId(1), 1, SimTime::ZERO));
        book.insert(Order::refill(OrderId(2), ItemId(1), 1, SimTime::ZERO));
        book.get_mut(OrderId(2))
            .unwrap()
            .set_status(OrderStatus::InProgress, time(1.0));
        assert_eq!(book.with_status(OrderStatus::Pending).count(), 1);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn display_names_kind() {
        let order = Order::refill(OrderId(500_003), ItemId(1), 1, SimTime::ZERO);
        assert_eq!(order.to_string(), "RefillOrder(id=500003, status=Pending)");
    }
}
