//! Serde data file structs for plant layouts.
//!
//! A layout lists the flow components, the links between them and which
//! components the stock owners are bound to. It is deserialized from RON,
//! JSON, or TOML and then driven through the `Factory` construction API by
//! the loader.

use serde::Deserialize;

// ===========================================================================
// Layout
// ===========================================================================

/// A complete plant layout.
#[derive(Debug, Clone, Deserialize)]
pub struct LayoutData {
    pub components: Vec<ComponentData>,
    #[serde(default)]
    pub connections: Vec<ConnectionData>,
    #[serde(default)]
    pub stock: StockData,
}

// ===========================================================================
// Components
// ===========================================================================

/// One flow component. Which geometry fields are required depends on
/// `type`: conveyors need `start` and `end`, everything else a
/// `coordinate`.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentData {
    pub id: String,
    /// `buffer`, `conveyor`, `depalletizer`, `batch_builder` or `junction`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinate: Option<(i32, i32)>,
    #[serde(default)]
    pub start: Option<(i32, i32)>,
    #[serde(default)]
    pub end: Option<(i32, i32)>,
    /// Junctions only.
    #[serde(default)]
    pub ratio: Option<RatioData>,
    /// Buffers only. Defaults to the pallet buffer process time.
    #[serde(default)]
    pub process_time: Option<f64>,
}

/// A junction ratio, either as `"2:1"` or as a list of weights.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RatioData {
    Text(String),
    Weights(Vec<u32>),
}

/// A link from `from`'s output `port` to `to`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionData {
    pub from: String,
    pub to: String,
    #[serde(default = "default_port")]
    pub port: String,
}

fn default_port() -> String {
    "out".to_string()
}

// ===========================================================================
// Stock owners
// ===========================================================================

/// Stock owner bindings. Both owners are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockData {
    #[serde(default)]
    pub warehouse: Option<WarehouseData>,
    #[serde(default)]
    pub item_warehouse: Option<ItemWarehouseData>,
    /// Turn item warehouse shortages into refill orders.
    #[serde(default)]
    pub auto_refill: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseData {
    pub input_buffer: String,
    pub output_buffer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemWarehouseData {
    pub input_buffers: Vec<String>,
    pub output_buffers: Vec<String>,
}

// ===========================================================================
// TOML wrappers
// ===========================================================================

/// TOML has no top-level arrays; item lists live under an `items` key.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlItems<T> {
    pub items: Vec<T>,
}
