//! Layout assembly: drives a parsed [`LayoutData`] through the `Factory`
//! construction API.
//!
//! Components are added in document order, then connections, then the stock
//! owners. Names are resolved against the graph, so a connection or binding
//! may refer to any component declared anywhere in the layout.

use crate::loader::DataLoadError;
use crate::schema::{ComponentData, LayoutData, RatioData};
use flowsim_core::catalogue::Catalogue;
use flowsim_core::component::junction::parse_ratio;
use flowsim_core::config::SimConfig;
use flowsim_core::fixed::SimTime;
use flowsim_core::graph::GraphError;
use flowsim_core::id::ComponentId;
use flowsim_core::stock::{ItemWarehouseBinding, WarehouseBinding};
use flowsim_core::unit::Coord;
use flowsim_core::{Factory, FactoryError};
use tracing::{debug, info};

/// Errors that can occur while building a factory from a layout.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error(transparent)]
    Data(#[from] DataLoadError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// A component lacks a geometry field its type requires.
    #[error("component '{id}' needs a '{field}'")]
    MissingField { id: String, field: &'static str },

    #[error("component '{id}': invalid ratio '{ratio}'")]
    InvalidRatio { id: String, ratio: String },

    #[error("component '{id}': process time {value} is not a valid duration")]
    InvalidProcessTime { id: String, value: f64 },
}

/// Build a factory from `layout`. The factory is assembled but not started.
pub fn build_factory(layout: &LayoutData, config: SimConfig, catalogue: Catalogue) -> Result<Factory, LayoutError> {
    let mut factory = Factory::new(config, catalogue)?;

    for component in &layout.components {
        let id = add_component(&mut factory, component)?;
        debug!(name = %component.id, kind = %component.kind, ?id, "component added");
    }

    for link in &layout.connections {
        let from = resolve(&factory, &link.from)?;
        let to = resolve(&factory, &link.to)?;
        factory.connect(from, to, &link.port)?;
    }

    if let Some(wh) = &layout.stock.warehouse {
        let binding = WarehouseBinding {
            input_buffer: resolve(&factory, &wh.input_buffer)?,
            output_buffer: resolve(&factory, &wh.output_buffer)?,
        };
        factory.add_warehouse(binding)?;
    }
    if let Some(iw) = &layout.stock.item_warehouse {
        let binding = ItemWarehouseBinding {
            input_buffers: resolve_all(&factory, &iw.input_buffers)?,
            output_buffers: resolve_all(&factory, &iw.output_buffers)?,
        };
        factory.add_item_warehouse(binding)?;
    }
    if layout.stock.auto_refill {
        factory.enable_auto_refill();
    }

    info!(
        components = layout.components.len(),
        connections = layout.connections.len(),
        "layout assembled"
    );
    Ok(factory)
}

fn resolve(factory: &Factory, name: &str) -> Result<ComponentId, GraphError> {
    factory.graph().resolve(name)
}

fn resolve_all(factory: &Factory, names: &[String]) -> Result<Vec<ComponentId>, GraphError> {
    names.iter().map(|name| resolve(factory, name)).collect()
}

fn add_component(factory: &mut Factory, c: &ComponentData) -> Result<ComponentId, LayoutError> {
    let id = match c.kind.as_str() {
        "buffer" => {
            let at = coordinate(c)?;
            match c.process_time {
                Some(value) => {
                    let process_time = SimTime::checked_from_num(value)
                        .filter(|t| *t >= SimTime::ZERO)
                        .ok_or_else(|| LayoutError::InvalidProcessTime {
                            id: c.id.clone(),
                            value,
                        })?;
                    factory.add_buffer_with(&c.id, at, process_time)?
                }
                None => factory.add_buffer(&c.id, at)?,
            }
        }
        "conveyor" => {
            let start = required(c, c.start, "start")?;
            let end = required(c, c.end, "end")?;
            factory.add_conveyor(&c.id, start, end)?
        }
        "depalletizer" => factory.add_depalletizer(&c.id, coordinate(c)?)?,
        "batch_builder" => factory.add_batch_builder(&c.id, coordinate(c)?)?,
        "junction" => {
            let ratio = match &c.ratio {
                Some(RatioData::Text(text)) => parse_ratio(text).ok_or_else(|| LayoutError::InvalidRatio {
                    id: c.id.clone(),
                    ratio: text.clone(),
                })?,
                Some(RatioData::Weights(weights)) => weights.clone(),
                // Plain round robin.
                None => vec![1],
            };
            factory.add_junction(&c.id, coordinate(c)?, ratio)?
        }
        other => return Err(GraphError::UnknownComponentType(other.to_string()).into()),
    };
    Ok(id)
}

fn coordinate(c: &ComponentData) -> Result<Coord, LayoutError> {
    required(c, c.coordinate, "coordinate")
}

fn required(c: &ComponentData, value: Option<(i32, i32)>, field: &'static str) -> Result<Coord, LayoutError> {
    value.map(Coord::from).ok_or_else(|| LayoutError::MissingField {
        id: c.id.clone(),
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsim_core::component::Component;
    use flowsim_core::test_utils::catalogue;

    fn layout(json: &str) -> LayoutData {
        serde_json::from_str(json).unwrap()
    }

    fn build(json: &str) -> Result<Factory, LayoutError> {
        build_factory(&layout(json), SimConfig::default(), catalogue())
    }

    #[test]
    fn builds_components_and_links() {
        let f = build(
            r#"{
                "components": [
                    {"id": "out", "type": "buffer", "coordinate": [0, 0]},
                    {"id": "belt", "type": "conveyor", "start": [1, 0], "end": [4, 0]},
                    {"id": "split", "type": "junction", "coordinate": [5, 0], "ratio": "2:1"},
                    {"id": "a", "type": "buffer", "coordinate": [6, 0], "process_time": 0.5},
                    {"id": "b", "type": "buffer", "coordinate": [5, 1]}
                ],
                "connections": [
                    {"from": "out", "to": "belt"},
                    {"from": "belt", "to": "split"},
                    {"from": "split", "to": "a", "port": "a"},
                    {"from": "split", "to": "b", "port": "b"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(f.graph().len(), 5);

        let belt = f.component_id("belt").unwrap();
        let Some(Component::Conveyor(c)) = f.component(belt) else {
            panic!("belt is not a conveyor");
        };
        assert_eq!(c.num_slots(), 4);
        assert_eq!(c.output(), f.component_id("split"));

        let split = f.component_id("split").unwrap();
        let j = f.component(split).unwrap().as_junction().unwrap();
        assert_eq!(j.ratio(), &[2, 1]);

        let a = f.component_id("a").unwrap();
        let a = f.component(a).unwrap().buffer().unwrap();
        assert_eq!(a.process_time(), SimTime::from_num(0.5));
    }

    #[test]
    fn unknown_component_type_fails() {
        let err = build(r#"{"components": [{"id": "x", "type": "crane", "coordinate": [0, 0]}]}"#);
        assert!(matches!(
            err,
            Err(LayoutError::Graph(GraphError::UnknownComponentType(ref t))) if t == "crane"
        ));
    }

    #[test]
    fn dangling_connection_fails() {
        let err = build(
            r#"{
                "components": [{"id": "a", "type": "buffer", "coordinate": [0, 0]}],
                "connections": [{"from": "a", "to": "ghost"}]
            }"#,
        );
        assert!(matches!(
            err,
            Err(LayoutError::Graph(GraphError::UnknownComponent(ref n))) if n == "ghost"
        ));
    }

    #[test]
    fn missing_geometry_fails() {
        let err = build(r#"{"components": [{"id": "belt", "type": "conveyor", "start": [0, 0]}]}"#);
        assert!(matches!(err, Err(LayoutError::MissingField { field: "end", .. })));
        let err = build(r#"{"components": [{"id": "d", "type": "depalletizer"}]}"#);
        assert!(matches!(err, Err(LayoutError::MissingField { field: "coordinate", .. })));
    }

    #[test]
    fn bad_ratio_fails() {
        let err = build(r#"{"components": [{"id": "j", "type": "junction", "coordinate": [0, 0], "ratio": "2:x"}]}"#);
        assert!(matches!(err, Err(LayoutError::InvalidRatio { .. })));
        let err = build(r#"{"components": [{"id": "j", "type": "junction", "coordinate": [0, 0], "ratio": [1, 0]}]}"#);
        assert!(matches!(err, Err(LayoutError::Graph(GraphError::InvalidRatio { .. }))));
    }

    #[test]
    fn negative_process_time_fails() {
        let err = build(r#"{"components": [{"id": "b", "type": "buffer", "coordinate": [0, 0], "process_time": -1.0}]}"#);
        assert!(matches!(err, Err(LayoutError::InvalidProcessTime { .. })));
    }

    #[test]
    fn missing_stock_binding_fails() {
        let err = build(
            r#"{
                "components": [{"id": "in", "type": "buffer", "coordinate": [0, 0]}],
                "stock": {"item_warehouse": {"input_buffers": ["in"], "output_buffers": []}}
            }"#,
        );
        assert!(matches!(
            err,
            Err(LayoutError::Factory(FactoryError::MissingBinding { .. }))
        ));

        let err = build(
            r#"{
                "components": [{"id": "in", "type": "buffer", "coordinate": [0, 0]}],
                "stock": {"warehouse": {"input_buffer": "in", "output_buffer": "nope"}}
            }"#,
        );
        assert!(matches!(err, Err(LayoutError::Graph(GraphError::UnknownComponent(_)))));
    }

    #[test]
    fn stock_section_binds_owners() {
        let f = build(
            r#"{
                "components": [
                    {"id": "wh_in", "type": "buffer", "coordinate": [0, 1]},
                    {"id": "wh_out", "type": "buffer", "coordinate": [0, 0]},
                    {"id": "iw_in", "type": "buffer", "coordinate": [5, 0]},
                    {"id": "iw_out", "type": "batch_builder", "coordinate": [6, 0]}
                ],
                "stock": {
                    "warehouse": {"input_buffer": "wh_in", "output_buffer": "wh_out"},
                    "item_warehouse": {"input_buffers": ["iw_in"], "output_buffers": ["iw_out"]},
                    "auto_refill": true
                }
            }"#,
        )
        .unwrap();
        let wh = f.warehouse().unwrap();
        assert_eq!(wh.binding().output_buffer, f.component_id("wh_out").unwrap());
        assert_eq!(wh.pallet_count(), 25);
        let iw = f.item_warehouse().unwrap();
        assert_eq!(iw.binding().input_buffers, vec![f.component_id("iw_in").unwrap()]);
        assert!(f.inventory().auto_refill());
        assert!(!f.is_started());
    }
}
