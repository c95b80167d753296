//! Stock owners: the pallet warehouse and the item warehouse.
//!
//! Both serve orders from an [`OrderQueue`], a min-heap keyed by
//! `(priority, insertion sequence)`: lower priority values are served
//! first and equal priorities are served in placement order.

pub mod item_warehouse;
pub mod warehouse;

pub use item_warehouse::{ItemWarehouse, ItemWarehouseBinding, Shortage};
pub use warehouse::{Warehouse, WarehouseBinding};

use crate::fixed::Priority;
use crate::id::OrderId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// One queued order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueuedOrder {
    pub priority: Priority,
    pub sequence: u64,
    pub order: OrderId,
}

#[derive(Debug, Clone, Default)]
pub struct OrderQueue {
    heap: BinaryHeap<Reverse<QueuedOrder>>,
    next_sequence: u64,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, order: OrderId, priority: Priority) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Reverse(QueuedOrder {
            priority,
            sequence,
            order,
        }));
    }

    /// Remove and return the most urgent order.
    pub fn pop(&mut self) -> Option<QueuedOrder> {
        self.heap.pop().map(|Reverse(q)| q)
    }

    pub fn peek(&self) -> Option<&QueuedOrder> {
        self.heap.peek().map(|Reverse(q)| q)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, order: OrderId) -> bool {
        self.heap.iter().any(|Reverse(q)| q.order == order)
    }

    /// Every queued order in serving order, without removing anything.
    pub fn sorted(&self) -> Vec<QueuedOrder> {
        let mut all: Vec<QueuedOrder> = self.heap.iter().map(|Reverse(q)| *q).collect();
        all.sort();
        all
    }

    /// Remove everything, in serving order.
    pub fn drain(&mut self) -> Vec<QueuedOrder> {
        let mut all = Vec::with_capacity(self.heap.len());
        while let Some(q) = self.pop() {
            all.push(q);
        }
        all
    }
}
