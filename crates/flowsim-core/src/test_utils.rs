//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests and in integration tests (via the
//! `test-utils` feature).

use crate::catalogue::{Catalogue, CatalogueBuilder};
use crate::component::DEFAULT_PORT;
use crate::config::SimConfig;
use crate::event::{Event, EventKind};
use crate::factory::Factory;
use crate::fixed::SimTime;
use crate::id::{ComponentId, ItemId};
use crate::stock::{ItemWarehouseBinding, WarehouseBinding};
use crate::unit::Coord;
use std::cell::RefCell;
use std::rc::Rc;

// ===========================================================================
// Time helper
// ===========================================================================

pub fn t(v: f64) -> SimTime {
    SimTime::from_num(v)
}

// ===========================================================================
// Items
// ===========================================================================

/// 1 kg, 1 dm³: 1000 per pallet (weight bound).
pub fn bolt() -> ItemId {
    ItemId(1)
}

/// 10 kg, 1 dm³: 100 per pallet.
pub fn gearbox() -> ItemId {
    ItemId(2)
}

/// 1 kg, 100 dm³: 21 per pallet (volume bound).
pub fn panel() -> ItemId {
    ItemId(3)
}

pub fn catalogue() -> Catalogue {
    let mut b = CatalogueBuilder::new();
    b.item(1, "bolt", 1.0, 1.0);
    b.item(2, "gearbox", 10.0, 1.0);
    b.item(3, "panel", 1.0, 100.0);
    b.build().unwrap()
}

// ===========================================================================
// Factories
// ===========================================================================

pub fn factory() -> Factory {
    factory_with(SimConfig::default())
}

pub fn factory_with(config: SimConfig) -> Factory {
    Factory::new(config, catalogue()).unwrap()
}

pub fn buffer(f: &mut Factory, name: &str, x: i32, y: i32) -> ComponentId {
    f.add_buffer(name, Coord::new(x, y)).unwrap()
}

pub fn conveyor(f: &mut Factory, name: &str, start: (i32, i32), end: (i32, i32)) -> ComponentId {
    f.add_conveyor(name, start.into(), end.into()).unwrap()
}

// ===========================================================================
// Reference plant
// ===========================================================================

/// A complete refill loop:
///
/// ```text
/// wh_out -> feed (conveyor) -> depal -item_out-> bb_in -> iw_in => item warehouse
///   ^                            |                                      |
///   |                          pallet_out                             iw_out
/// wh_in <- return (conveyor) <---+                                      |
///                                                           outfeed (conveyor)
/// ```
pub struct Plant {
    pub factory: Factory,
    pub wh_in: ComponentId,
    pub wh_out: ComponentId,
    pub feed: ComponentId,
    pub depal: ComponentId,
    pub ret: ComponentId,
    pub bb_in: ComponentId,
    pub iw_in: ComponentId,
    pub iw_out: ComponentId,
    pub outfeed: ComponentId,
}

pub fn plant() -> Plant {
    plant_with(SimConfig::default())
}

pub fn plant_with(config: SimConfig) -> Plant {
    let mut f = factory_with(config);
    let batch_time = f.config().batch_buffer_process_time;

    let wh_out = buffer(&mut f, "wh_out", 0, 0);
    let feed = conveyor(&mut f, "feed", (1, 0), (3, 0));
    let depal = f.add_depalletizer("depal", Coord::new(4, 0)).unwrap();
    let ret = conveyor(&mut f, "return", (3, -1), (1, -1));
    let wh_in = buffer(&mut f, "wh_in", 0, -1);
    let bb_in = f.add_batch_builder("bb_in", Coord::new(4, 1)).unwrap();
    let iw_in = f.add_buffer_with("iw_in", Coord::new(4, 2), batch_time).unwrap();
    let iw_out = f.add_batch_builder("iw_out", Coord::new(6, 2)).unwrap();
    let outfeed = conveyor(&mut f, "outfeed", (6, 3), (6, 12));

    f.connect(wh_out, feed, DEFAULT_PORT).unwrap();
    f.connect(feed, depal, DEFAULT_PORT).unwrap();
    f.connect(depal, bb_in, "item_out").unwrap();
    f.connect(depal, ret, "pallet_out").unwrap();
    f.connect(ret, wh_in, DEFAULT_PORT).unwrap();
    f.connect(bb_in, iw_in, DEFAULT_PORT).unwrap();
    f.connect(iw_out, outfeed, DEFAULT_PORT).unwrap();

    f.add_warehouse(WarehouseBinding {
        input_buffer: wh_in,
        output_buffer: wh_out,
    })
    .unwrap();
    f.add_item_warehouse(ItemWarehouseBinding {
        input_buffers: vec![iw_in],
        output_buffers: vec![iw_out],
    })
    .unwrap();

    Plant {
        factory: f,
        wh_in,
        wh_out,
        feed,
        depal,
        ret,
        bb_in,
        iw_in,
        iw_out,
        outfeed,
    }
}

// ===========================================================================
// Event capture
// ===========================================================================

/// Subscribe to `kinds` and collect every delivered event in order.
pub fn record(f: &mut Factory, kinds: &[EventKind]) -> Rc<RefCell<Vec<Event>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    for &kind in kinds {
        let sink = Rc::clone(&log);
        f.event_bus_mut()
            .subscribe(kind, Box::new(move |e: &Event| sink.borrow_mut().push(e.clone())));
    }
    log
}
