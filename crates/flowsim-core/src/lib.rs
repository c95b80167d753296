//! Flowsim Core -- a discrete-event material-flow simulator for warehouses
//! and factory floors.
//!
//! This crate provides the virtual-time scheduler, the flow components that
//! move pallets and item batches around (buffers, conveyors, depalletizers,
//! batch builders, junctions), the stock owners that hold inventory and
//! serve orders, and the notification bus observers read the model through.
//!
//! # Execution Model
//!
//! Simulation is single-threaded and cooperative. Every loop in the model
//! (a conveyor's shift cycle, a buffer's handoff, the warehouse's order
//! loop, ...) is an explicit state machine. The [`sim::Scheduler`] pops
//! events in `(time, sequence)` order and the engine resumes the state
//! machine each event names:
//!
//! 1. **Pop** -- Take the earliest event and move the clock to its time.
//! 2. **Resume** -- Route it to the component or stock loop it belongs to,
//!    which mutates its own state and schedules its next wake-up.
//! 3. **Notify** -- Deliver buffered notifications to subscribers.
//!
//! Events at the same instant resume in insertion order, so a run is fully
//! determined by its layout, configuration and placed orders.
//!
//! # Assembly
//!
//! ```rust,ignore
//! let mut f = Factory::new(SimConfig::default(), catalogue)?;
//! let out = f.add_buffer("wh_out", Coord::new(0, 0))?;
//! let feed = f.add_conveyor("feed", Coord::new(1, 0), Coord::new(3, 0))?;
//! f.connect(out, feed, DEFAULT_PORT)?;
//! f.start()?;
//! f.advance(time(60.0))?;
//! ```
//!
//! # Key Types
//!
//! - [`factory::Factory`] -- Construction and clock-driving API.
//! - [`sim::Scheduler`] -- Virtual clock, event heap and one-shot signals.
//! - [`component::Component`] -- The closed set of flow components and the
//!   [`component::FlowComponent`] capability trait.
//! - [`stock::Warehouse`] / [`stock::ItemWarehouse`] -- Stock owners with
//!   priority order queues.
//! - [`inventory::InventoryManager`] -- Refill splitting and demand scans.
//! - [`fixed::SimTime`] -- Q32.32 fixed-point time for deterministic runs.
//! - [`event::EventBus`] -- Topic-based notification bus with buffered
//!   delivery.

pub mod catalogue;
pub mod component;
pub mod config;
#[cfg(feature = "data-loader")]
pub mod data_loader;
pub mod engine;
pub mod event;
pub mod factory;
pub mod fixed;
pub mod graph;
pub mod id;
pub mod inventory;
pub mod order;
pub mod sim;
pub mod stock;
pub mod unit;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use factory::{Factory, FactoryError};
