//! Inventory manager: turns unmet item demand into refill orders for the
//! pallet warehouse.
//!
//! A refill request is split into orders of at most one pallet's worth,
//! where a pallet's worth comes from the catalogue and the configured pallet
//! load limits. Requests that divide evenly produce no trailing order.
//!
//! With auto-refill enabled, a periodic scan drains the item warehouse's
//! shortage records, adds them up per item and places one refill request per
//! item. A request never asks for more than the item warehouse can store, so
//! one scan places at most `capacity / qty_per_pallet + 1` orders per item.

use crate::engine::Engine;
use crate::id::{ItemId, OrderId};
use crate::order::{Order, OrderError};
use crate::sim::ProcessId;
use crate::stock::warehouse;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct InventoryManager {
    auto_refill: bool,
    scans: u64,
    refills_placed: u64,
}

impl InventoryManager {
    pub fn auto_refill(&self) -> bool {
        self.auto_refill
    }

    pub(crate) fn set_auto_refill(&mut self, enabled: bool) {
        self.auto_refill = enabled;
    }

    /// Demand scans run so far.
    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// Refill orders placed so far, manual or automatic.
    pub fn refills_placed(&self) -> u64 {
        self.refills_placed
    }
}

/// Split `qty` units into per-pallet quantities. Allocates one entry per
/// pallet, so callers bound `qty` first.
pub fn split_per_pallet(qty: u32, per_pallet: u32) -> Vec<u32> {
    if per_pallet == 0 {
        return Vec::new();
    }
    let mut parts = vec![per_pallet; (qty / per_pallet) as usize];
    let rest = qty % per_pallet;
    if rest > 0 {
        parts.push(rest);
    }
    parts
}

/// Place refill orders for `qty` units of `item` on the warehouse queue,
/// each with priority equal to its creation time.
pub(crate) fn place_refill_order(engine: &mut Engine, item: ItemId, qty: u32) -> Result<Vec<OrderId>, OrderError> {
    if qty == 0 {
        return Err(OrderError::Empty);
    }
    let per_pallet = engine
        .catalogue
        .qty_per_pallet(item, engine.config.pallet_max_volume, engine.config.pallet_max_weight)
        .map_err(|_| OrderError::UnknownItem(item))?;
    if per_pallet == 0 {
        return Err(OrderError::DoesNotFitPallet(item));
    }
    if engine.warehouse.is_none() {
        return Err(OrderError::NoStockOwner("warehouse"));
    }

    let now = engine.now();
    let mut placed = Vec::new();
    for part in split_per_pallet(qty, per_pallet) {
        let id = engine.ids.order();
        engine.orders.insert(Order::refill(id, item, part, now));
        warehouse::place_order(engine, id, now);
        info!(t = %now, order = %id, %item, qty = part, "refill order placed");
        placed.push(id);
    }
    engine.inventory.refills_placed += placed.len() as u64;
    Ok(placed)
}

/// Schedule the first demand scan one interval from now.
pub(crate) fn start(engine: &mut Engine) {
    if engine.inventory.auto_refill {
        let interval = engine.config.requested_item_scan_interval;
        engine.scheduler.timeout(interval, ProcessId::DemandScan);
    }
}

pub(crate) fn resume_scan(engine: &mut Engine) {
    if !engine.inventory.auto_refill {
        return;
    }
    engine.inventory.scans += 1;
    let shortages = engine
        .item_warehouse
        .as_mut()
        .map(|iw| iw.drain_requested())
        .unwrap_or_default();

    let mut missing: BTreeMap<ItemId, u64> = BTreeMap::new();
    for s in shortages {
        *missing.entry(s.item).or_insert(0) += u64::from(s.missing);
    }
    let capacity = engine
        .item_warehouse
        .as_ref()
        .map_or(engine.config.item_warehouse_item_capacity, |iw| iw.capacity());
    for (item, qty) in missing {
        if qty > capacity {
            warn!(t = %engine.now(), %item, qty, capacity, "shortage exceeds item warehouse capacity, capping refill");
        }
        let qty = u32::try_from(qty.min(capacity)).unwrap_or(u32::MAX);
        if let Err(err) = place_refill_order(engine, item, qty) {
            warn!(t = %engine.now(), %item, qty, %err, "could not refill");
        }
    }

    let interval = engine.config.requested_item_scan_interval;
    engine.scheduler.timeout(interval, ProcessId::DemandScan);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{Catalogue, CatalogueBuilder};
    use crate::component::{Buffer, Component};
    use crate::config::SimConfig;
    use crate::fixed::{SimTime, time};
    use crate::order::OrderKind;
    use crate::stock::{ItemWarehouse, ItemWarehouseBinding, Warehouse, WarehouseBinding, item_warehouse};
    use crate::unit::Coord;

    fn catalogue() -> Catalogue {
        let mut b = CatalogueBuilder::new();
        // 100 per pallet by weight (1000 kg / 10 kg).
        b.item(1, "crate", 10.0, 1.0);
        // Heavier than a pallet can carry.
        b.item(2, "anvil", 2000.0, 1.0);
        b.build().unwrap()
    }

    fn engine_with_warehouse() -> Engine {
        let mut e = Engine::new(SimConfig::default(), catalogue());
        let mut add = |e: &mut Engine, name: &str| {
            e.graph
                .insert(name, |id| Ok(Component::Buffer(Buffer::new(id, name, Coord::new(0, 0), SimTime::ZERO))))
                .unwrap()
        };
        let input = add(&mut e, "in");
        let output = add(&mut e, "out");
        e.warehouse = Some(Warehouse::new(
            WarehouseBinding {
                input_buffer: input,
                output_buffer: output,
            },
            4,
            Vec::new(),
        ));
        e
    }

    fn refill_qty(e: &Engine, id: OrderId) -> u32 {
        match e.orders.get(id).unwrap().kind {
            OrderKind::Refill { qty, .. } => qty,
            OrderKind::Opm { .. } => panic!("not a refill"),
        }
    }

    #[test]
    fn splits_into_full_pallets_and_remainder() {
        assert_eq!(split_per_pallet(250, 100), vec![100, 100, 50]);
        assert_eq!(split_per_pallet(200, 100), vec![100, 100]);
        assert_eq!(split_per_pallet(7, 100), vec![7]);
        assert!(split_per_pallet(5, 0).is_empty());
    }

    #[test]
    fn refill_goes_onto_warehouse_queue() {
        let mut e = engine_with_warehouse();
        e.scheduler.advance_clock(time(3.0));
        let ids = place_refill_order(&mut e, ItemId(1), 250).unwrap();
        let qtys: Vec<u32> = ids.iter().map(|&id| refill_qty(&e, id)).collect();
        assert_eq!(qtys, vec![100, 100, 50]);

        let queue = e.warehouse.as_ref().unwrap().queue();
        assert_eq!(queue.len(), 3);
        assert!(queue.sorted().iter().all(|q| q.priority == time(3.0)));
        assert_eq!(e.inventory.refills_placed(), 3);
    }

    #[test]
    fn refill_rejections() {
        let mut e = engine_with_warehouse();
        assert_eq!(place_refill_order(&mut e, ItemId(9), 5), Err(OrderError::UnknownItem(ItemId(9))));
        assert_eq!(place_refill_order(&mut e, ItemId(1), 0), Err(OrderError::Empty));
        assert_eq!(
            place_refill_order(&mut e, ItemId(2), 1),
            Err(OrderError::DoesNotFitPallet(ItemId(2)))
        );

        let mut bare = Engine::new(SimConfig::default(), catalogue());
        assert_eq!(
            place_refill_order(&mut bare, ItemId(1), 5),
            Err(OrderError::NoStockOwner("warehouse"))
        );
        assert!(bare.orders.is_empty());
    }

    #[test]
    fn scan_turns_shortages_into_refills() {
        let mut e = engine_with_warehouse();
        e.inventory.set_auto_refill(true);
        e.item_warehouse = Some(ItemWarehouse::new(ItemWarehouseBinding::default(), 500));

        let opm = e.ids.order();
        e.orders
            .insert(Order::opm(opm, [(ItemId(1), 30)].into_iter().collect(), SimTime::ZERO));
        item_warehouse::place_order(&mut e, opm, SimTime::ZERO);
        item_warehouse::resume_sweep(&mut e);
        // A second sweep must not record the same shortage again.
        item_warehouse::resume_sweep(&mut e);

        resume_scan(&mut e);
        let queue = e.warehouse.as_ref().unwrap().queue();
        assert_eq!(queue.len(), 1);
        let refill = queue.peek().unwrap().order;
        assert_eq!(refill_qty(&e, refill), 30);
        assert_eq!(e.inventory.scans(), 1);

        // Nothing new to refill on the next scan.
        resume_scan(&mut e);
        assert_eq!(e.warehouse.as_ref().unwrap().queue().len(), 1);
    }

    #[test]
    fn scan_caps_refill_at_storage_capacity() {
        let mut e = engine_with_warehouse();
        e.inventory.set_auto_refill(true);
        e.item_warehouse = Some(ItemWarehouse::new(ItemWarehouseBinding::default(), 250));

        for _ in 0..3 {
            let opm = e.ids.order();
            e.orders
                .insert(Order::opm(opm, [(ItemId(1), u32::MAX)].into_iter().collect(), SimTime::ZERO));
            item_warehouse::place_order(&mut e, opm, SimTime::ZERO);
        }
        item_warehouse::resume_sweep(&mut e);
        assert_eq!(e.item_warehouse.as_ref().unwrap().requested().count(), 3);

        resume_scan(&mut e);
        let queued: Vec<u32> = e
            .warehouse
            .as_ref()
            .unwrap()
            .queue()
            .sorted()
            .iter()
            .map(|q| refill_qty(&e, q.order))
            .collect();
        assert_eq!(queued, vec![100, 100, 50]);
    }

    #[test]
    fn scan_is_inert_without_auto_refill() {
        let mut e = engine_with_warehouse();
        resume_scan(&mut e);
        assert_eq!(e.inventory.scans(), 0);
        assert_eq!(e.scheduler.pending(), 0);
    }
}
