//! Property-based tests for the flowsim core engine.
//!
//! Uses proptest to generate random schedules, order streams and pallet
//! arrivals, then verify structural invariants hold.

use flowsim_core::component::DEFAULT_PORT;
use flowsim_core::fixed::time;
use flowsim_core::id::{ItemId, OrderId, UnitId};
use flowsim_core::inventory::split_per_pallet;
use flowsim_core::sim::{Horizon, ProcessId, Scheduler};
use flowsim_core::stock::OrderQueue;
use flowsim_core::test_utils::*;
use flowsim_core::unit::Payload;
use flowsim_core::Factory;
use proptest::prelude::*;
use std::collections::BTreeSet;

// ===========================================================================
// Generators
// ===========================================================================

/// Operations driven against the reference plant.
#[derive(Debug, Clone)]
enum PlantOp {
    Refill(usize, u32),
    Opm(Vec<(usize, u32)>),
    Advance(u32),
}

fn arb_item() -> impl Strategy<Value = usize> {
    0..3usize
}

fn arb_plant_op() -> impl Strategy<Value = PlantOp> {
    prop_oneof![
        (arb_item(), 1..80u32).prop_map(|(i, q)| PlantOp::Refill(i, q)),
        proptest::collection::vec((arb_item(), 0..15u32), 1..4).prop_map(PlantOp::Opm),
        (1..40u32).prop_map(PlantOp::Advance),
    ]
}

fn item(index: usize) -> ItemId {
    [bolt(), gearbox(), panel()][index]
}

/// Every unit sits in at most one component, and where it claims to be.
fn assert_units_consistent(f: &Factory) {
    let mut seen = BTreeSet::new();
    for (id, component) in f.graph().iter() {
        for payload in component.contents() {
            if let Payload::Unit(unit) = payload {
                assert!(seen.insert(unit), "{unit} held by two components");
                assert_eq!(f.unit(unit).unwrap().location.component, Some(id));
            }
        }
    }
}

// ===========================================================================
// Scheduler
// ===========================================================================

proptest! {
    #[test]
    fn events_pop_in_time_then_insertion_order(delays in proptest::collection::vec(0..20u32, 1..60)) {
        let mut sched = Scheduler::new();
        for (i, &d) in delays.iter().enumerate() {
            sched.timeout(time(f64::from(d)), ProcessId::External(i as u64));
        }
        let mut last: Option<(u32, u64)> = None;
        let mut popped = 0;
        while let Some(event) = sched.next_due(Horizon::Idle) {
            let ProcessId::External(i) = event.process else {
                panic!("unexpected process");
            };
            let key = (delays[i as usize], i);
            if let Some(prev) = last {
                prop_assert!(prev < key);
            }
            prop_assert_eq!(event.time, sched.now());
            last = Some(key);
            popped += 1;
        }
        prop_assert_eq!(popped, delays.len());
    }

    #[test]
    fn order_queue_serves_lowest_priority_first(priorities in proptest::collection::vec(0..10u32, 0..40)) {
        let mut queue = OrderQueue::new();
        for (i, &p) in priorities.iter().enumerate() {
            queue.push(OrderId(i as u64), time(f64::from(p)));
        }
        let served: Vec<OrderId> = queue.drain().into_iter().map(|q| q.order).collect();
        let mut expected: Vec<(u32, usize)> = priorities.iter().copied().zip(0..).collect();
        expected.sort();
        let expected: Vec<OrderId> = expected.into_iter().map(|(_, i)| OrderId(i as u64)).collect();
        prop_assert_eq!(served, expected);
        prop_assert!(queue.is_empty());
    }
}

// ===========================================================================
// Inventory
// ===========================================================================

proptest! {
    #[test]
    fn refill_split_covers_quantity(qty in 1..10_000u32, per_pallet in 1..500u32) {
        let parts = split_per_pallet(qty, per_pallet);
        prop_assert_eq!(parts.iter().sum::<u32>(), qty);
        prop_assert!(parts.iter().all(|&p| p > 0 && p <= per_pallet));
        // Only the last part may be short.
        prop_assert!(parts[..parts.len() - 1].iter().all(|&p| p == per_pallet));
        prop_assert_eq!(parts.len() as u32, qty.div_ceil(per_pallet));
    }
}

// ===========================================================================
// Conveyors
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn conveyor_chain_never_loses_or_duplicates(gaps in proptest::collection::vec(0..7u32, 1..12)) {
        let mut f = factory();
        let c1 = conveyor(&mut f, "c1", (0, 0), (0, 3));
        let c2 = conveyor(&mut f, "c2", (1, 3), (4, 3));
        f.connect(c1, c2, DEFAULT_PORT).unwrap();
        f.start().unwrap();

        let mut loaded: Vec<UnitId> = Vec::new();
        let mut now = 0u32;
        for gap in gaps {
            now += gap;
            f.advance(time(f64::from(now))).unwrap();
            if let Ok(p) = f.create_pallet(c1) {
                loaded.push(p);
            }
            assert_units_consistent(&f);
        }
        f.advance(time(f64::from(now + 60))).unwrap();
        assert_units_consistent(&f);

        let mut held: Vec<UnitId> = [c1, c2]
            .into_iter()
            .flat_map(|c| f.component(c).unwrap().contents())
            .filter_map(Payload::unit)
            .collect();
        held.sort();
        loaded.sort();
        prop_assert_eq!(held, loaded);
    }
}

// ===========================================================================
// Plant
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn plant_stock_stays_consistent(ops in proptest::collection::vec(arb_plant_op(), 1..20)) {
        let mut p = plant();
        p.factory.enable_auto_refill();
        p.factory.start().unwrap();
        let capacity = p.factory.config().item_warehouse_item_capacity;
        let mut now = 0u32;

        for op in ops {
            match op {
                PlantOp::Refill(i, qty) => {
                    p.factory.place_refill_order(item(i), qty).unwrap();
                }
                PlantOp::Opm(lines) => {
                    let lines: Vec<(ItemId, u32)> = lines.into_iter().map(|(i, q)| (item(i), q)).collect();
                    // All-zero lines are refused as empty.
                    let _ = p.factory.place_opm_order(lines, None);
                }
                PlantOp::Advance(dt) => {
                    now += dt;
                    p.factory.advance(time(f64::from(now))).unwrap();
                }
            }

            let iw = p.factory.item_warehouse().unwrap();
            for (id, stock, available) in iw.levels() {
                prop_assert!(available <= stock, "{id}: available {available} > stock {stock}");
            }
            prop_assert!(iw.item_count() <= capacity);
            let wh = p.factory.warehouse().unwrap();
            prop_assert!(wh.pallet_count() <= wh.capacity());
            assert_units_consistent(&p.factory);
        }
    }
}
