use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies a flow component (buffer, conveyor, ...) in the factory graph.
    pub struct ComponentId;

    /// Identifies a triggerable event handle owned by the scheduler.
    pub struct SignalId;
}

/// Identifies a catalogue item. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u32);

/// Identifies a transport unit (pallet or item batch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u64);

/// Identifies an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Id generation
// ---------------------------------------------------------------------------

/// The families of generated identifiers. Each family owns a leading type
/// digit and a fixed total digit count, so ids are recognizable in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Pallet,
    Batch,
    Order,
}

impl IdKind {
    fn type_digit(self) -> u64 {
        match self {
            IdKind::Pallet => 1,
            IdKind::Batch => 2,
            IdKind::Order => 5,
        }
    }

    fn length(self) -> u32 {
        match self {
            IdKind::Pallet | IdKind::Batch => 8,
            IdKind::Order => 6,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Sequential, type-prefixed id source scoped to one simulation run.
///
/// Passed by `&mut` into whatever creates units or orders; there is no
/// process-wide counter. Ids are `digit * 10^(len-1) + n` with `n` counting
/// from 1, so the sequence is deterministic for a given insertion order.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    next: [u64; 3],
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next raw id for `kind`.
    ///
    /// # Panics
    ///
    /// Panics when the family's digit space is exhausted.
    pub fn generate(&mut self, kind: IdKind) -> u64 {
        let slot = &mut self.next[kind.index()];
        *slot += 1;
        let span = 10u64.pow(kind.length() - 1);
        assert!(*slot < span, "id space exhausted for {kind:?}");
        kind.type_digit() * span + *slot
    }

    pub fn pallet(&mut self) -> UnitId {
        UnitId(self.generate(IdKind::Pallet))
    }

    pub fn batch(&mut self) -> UnitId {
        UnitId(self.generate(IdKind::Batch))
    }

    pub fn order(&mut self) -> OrderId {
        OrderId(self.generate(IdKind::Order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_type_digit_and_length() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.pallet(), UnitId(10_000_001));
        assert_eq!(ids.batch(), UnitId(20_000_001));
        assert_eq!(ids.order(), OrderId(500_001));
    }

    #[test]
    fn families_count_independently() {
        let mut ids = IdGenerator::new();
        ids.pallet();
        ids.pallet();
        assert_eq!(ids.batch(), UnitId(20_000_001));
        assert_eq!(ids.pallet(), UnitId(10_000_003));
    }

    #[test]
    fn generators_are_scoped() {
        let mut a = IdGenerator::new();
        let mut b = IdGenerator::new();
        a.order();
        assert_eq!(b.order(), OrderId(500_001));
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ItemId(1), "bolts");
        map.insert(ItemId(2), "nuts");
        assert_eq!(map[&ItemId(1)], "bolts");
    }

    #[test]
    fn display_is_prefixed() {
        assert_eq!(OrderId(500_002).to_string(), "order#500002");
    }
}
